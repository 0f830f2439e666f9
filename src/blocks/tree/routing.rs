//! Track pool planning for the deserializer tree.
//!
//! The last stage of a tree with ratio `r` has `r` outputs and `r / 2`
//! inputs live at the same cross-section, so the pool holds `r * 3 / 2`
//! slots. Nets take slots in allocation order, modulo the pool size.

use std::collections::BTreeMap;

use arcstr::ArcStr;
use itertools::Itertools;
use serde::Serialize;
use subgeom::Span;

use crate::error::{Error, Result};
use crate::layout::track::TrackRing;
use crate::layout::{LayerId, PlacementGrid};

/// How the signal pool is split between `xm` and `xxm`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Serialize)]
pub struct PoolSplit {
    /// Pool slots on `xm`. They come first in slot order.
    pub xm: usize,
    /// Pool slots on `xxm`.
    pub xxm: usize,
    /// Whether the last `xm` signal wire is reserved to reach `xxm`.
    pub handoff: bool,
}

impl PoolSplit {
    #[inline]
    pub fn size(&self) -> usize {
        self.xm + self.xxm
    }
}

#[inline]
pub fn ratio(num_stages: usize) -> usize {
    1 << num_stages
}

#[inline]
pub fn pool_size(num_stages: usize) -> usize {
    ratio(num_stages) * 3 / 2
}

/// The stage of the unit at breadth-first position `unit_idx`.
#[inline]
pub fn stage_of(unit_idx: usize) -> usize {
    (usize::BITS - 1 - (unit_idx + 1).leading_zeros()) as usize
}

/// Splits a pool of `required` slots across the signal layers.
pub fn split_pool(
    required: usize,
    n_xm: usize,
    n_xxm: usize,
    num_layers: usize,
) -> Result<PoolSplit> {
    match num_layers {
        1 => {
            if n_xm < required {
                return Err(Error::ResourceExhausted {
                    required,
                    available: n_xm,
                });
            }
            Ok(PoolSplit {
                xm: required,
                xxm: 0,
                handoff: false,
            })
        }
        2 => {
            // One extra track is needed to via up to xxm.
            if n_xm + n_xxm < required + 1 {
                return Err(Error::ResourceExhausted {
                    required: required + 1,
                    available: n_xm + n_xxm,
                });
            }
            if required <= n_xm {
                return Ok(PoolSplit {
                    xm: required,
                    xxm: 0,
                    handoff: false,
                });
            }
            if n_xm < 1 {
                return Err(Error::InvalidParam(
                    "at least one xm signal track is needed to reach xxm".into(),
                ));
            }
            Ok(PoolSplit {
                xm: n_xm - 1,
                xxm: required - n_xm + 1,
                handoff: true,
            })
        }
        n => Err(Error::Unsupported(format!(
            "{n} horizontal signal layers; only 1 or 2 are supported"
        ))),
    }
}

/// Pool slots assigned to the tree input and to the outputs of each stage.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SlotPlan {
    pub input: usize,
    /// `stages[s][2 * i + side]` is the slot of output `side` of unit `i`.
    pub stages: Vec<Vec<usize>>,
}

impl SlotPlan {
    /// Slots live across stage `stage`: its inputs followed by its outputs.
    pub fn live_at(&self, stage: usize) -> Vec<usize> {
        let mut live = if stage == 0 {
            vec![self.input]
        } else {
            self.stages[stage - 1].clone()
        };
        live.extend(self.stages[stage].iter().copied());
        live
    }
}

pub fn plan_slots(num_stages: usize, pool: usize) -> Result<SlotPlan> {
    let mut ring = TrackRing::new((0..pool).collect());
    let input = ring.take(1)?[0];
    let stages = (0..num_stages)
        .map(|stage| ring.take(2 << stage))
        .collect::<Result<Vec<_>>>()?;
    Ok(SlotPlan { input, stages })
}

/// A `ym` riser from the hand-off track up to an `xxm` pool track.
#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct Riser {
    pub net: ArcStr,
    pub track: i64,
    /// Extent of the hand-off stub feeding the riser.
    pub stub_lower: i64,
    pub stub_upper: i64,
}

impl Riser {
    fn stub(&self) -> Span {
        Span::new(self.stub_lower, self.stub_upper)
    }
}

fn spans_overlap(a: Span, b: Span) -> bool {
    a.start() < b.stop() && b.start() < a.stop()
}

/// `ym` tracks and hand-off stubs claimed so far in one tree.
///
/// Every riser crosses the hand-off track, so a `ym` track carries at most
/// one net, and stubs of different nets on the hand-off track are disjoint.
#[derive(Debug, Clone, Default)]
pub struct RiserClaims {
    tracks: BTreeMap<i64, ArcStr>,
    risers: Vec<Riser>,
}

impl RiserClaims {
    #[inline]
    pub fn risers(&self) -> &[Riser] {
        &self.risers
    }

    /// Claims the `ym` track closest to the middle of `stub` that `net` can use.
    ///
    /// Candidates are the `ym` tracks within `[0, width]`, nearest first.
    pub fn claim(
        &mut self,
        grid: &PlacementGrid,
        ym_layer: LayerId,
        net: &str,
        stub: Span,
        width: i64,
    ) -> Result<i64> {
        let pitch = grid.layer(ym_layer)?.pitch;
        let x = stub.center();
        let num_tracks = (width / pitch).max(0);
        let candidates = (0..num_tracks)
            .map(|idx| Ok((idx, grid.track_coord(ym_layer, idx)?)))
            .collect::<Result<Vec<_>>>()?;
        for (idx, coord) in candidates
            .into_iter()
            .sorted_by_key(|&(idx, coord)| ((coord - x).abs(), idx))
        {
            if self.tracks.get(&idx).map_or(false, |owner| owner != net) {
                continue;
            }
            let span = Span::new(stub.start().min(coord), stub.stop().max(coord));
            let blocked = self
                .risers
                .iter()
                .any(|r| r.net != net && spans_overlap(r.stub(), span));
            if blocked {
                continue;
            }
            let net = ArcStr::from(net);
            self.tracks.insert(idx, net.clone());
            self.risers.push(Riser {
                net,
                track: idx,
                stub_lower: span.start(),
                stub_upper: span.stop(),
            });
            return Ok(idx);
        }
        Err(Error::ResourceExhausted {
            required: self.tracks.len() + 1,
            available: num_tracks as usize,
        })
    }
}
