// Copyright (c) 2026 pulsewatch contributors
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/pulsewatch/pulsewatch

//! Direction-finding is explicitly out of scope for this crate. This
//! module exists only to document the seam a downstream bearing tool would
//! plug into: [`MatchedSignal::avgs`] already exposes exactly the ordered
//! per-antenna power data a gain-delta bearing estimate needs, so no
//! reshaping of the core types is required to add one later.

use crate::model::MatchedSignal;

/// A trait seam for a downstream direction-finding tool. Deliberately
/// unimplemented here.
pub trait BearingEstimator {
    /// Estimate a bearing in degrees from a matched signal's per-antenna
    /// power distribution, or `None` if too few antennas contributed.
    fn estimate(&self, matched: &MatchedSignal) -> Option<f64>;
}
