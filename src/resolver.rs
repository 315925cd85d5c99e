//! Table lookups from answers to media. A missing entry is a normal outcome:
//! callers treat `None` as "no transition".

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::config::Profile;
use crate::grid::Cell;
use crate::selection::CompositeKey;

pub type ResourceId = String;

/// Tappable rectangle on a result video: one column and an inclusive row range,
/// both 1-based on the 6x6 result grid.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct HotspotZone {
    pub col: u8,
    pub rows: (u8, u8),
    pub resource: ResourceId,
}

impl HotspotZone {
    pub fn contains(&self, cell: Cell) -> bool {
        cell.col == self.col && (self.rows.0..=self.rows.1).contains(&cell.row)
    }

    fn overlaps(&self, other: &HotspotZone) -> bool {
        self.col == other.col && self.rows.0 <= other.rows.1 && other.rows.0 <= self.rows.1
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ZoneOverlap {
    pub result: ResourceId,
    pub first: usize,
    pub second: usize,
}

#[derive(Debug, Clone, Default)]
struct RefinementTable {
    arity: HashMap<String, u8>,
    prompts: HashMap<String, ResourceId>,
    layouts: HashMap<u8, Vec<u8>>,
}

#[derive(Debug, Clone, Default)]
pub struct Resolver {
    results: HashMap<String, ResourceId>,
    refinement: Option<RefinementTable>,
    hotspots: HashMap<ResourceId, Vec<HotspotZone>>,
}

impl Resolver {
    pub fn from_profile(profile: &Profile) -> Self {
        let refinement = profile.refinement.as_ref().map(|r| RefinementTable {
            arity: r.arity.clone(),
            prompts: r.prompts.clone(),
            layouts: r
                .layouts
                .iter()
                .map(|l| (l.arity, l.cells.clone()))
                .collect(),
        });
        Self {
            results: profile.results.clone(),
            refinement,
            hotspots: profile.hotspots.clone(),
        }
    }

    pub fn refinement_enabled(&self) -> bool {
        self.refinement.is_some()
    }

    pub fn resolve_result(&self, key: &CompositeKey) -> Option<&ResourceId> {
        self.results.get(key.as_str())
    }

    pub fn resolve_refinement_prompt(&self, triple: &CompositeKey) -> Option<&ResourceId> {
        self.refinement.as_ref()?.prompts.get(triple.as_str())
    }

    pub fn arity(&self, triple: &CompositeKey) -> Option<u8> {
        self.refinement.as_ref()?.arity.get(triple.as_str()).copied()
    }

    /// 1-based option number for a tap on the refinement screen.
    pub fn refinement_option(&self, arity: u8, cell: Cell) -> Option<u8> {
        let cells = self.refinement.as_ref()?.layouts.get(&arity)?;
        let pos = cells.iter().position(|&c| c == cell.index)?;
        Some(pos as u8 + 1)
    }

    pub fn hotspots(&self, result: &str) -> &[HotspotZone] {
        self.hotspots.get(result).map(Vec::as_slice).unwrap_or(&[])
    }

    /// First zone containing `cell`; earlier zones win on overlap.
    pub fn hit_zone(&self, result: &str, cell: Cell) -> Option<&HotspotZone> {
        self.hotspots(result).iter().find(|z| z.contains(cell))
    }

    /// Zone pairs that share at least one cell. Only the first of each pair is
    /// ever reachable by a tap.
    pub fn overlapping_zones(&self) -> Vec<ZoneOverlap> {
        let mut out = Vec::new();
        for (result, zones) in &self.hotspots {
            for (i, a) in zones.iter().enumerate() {
                for (j, b) in zones.iter().enumerate().skip(i + 1) {
                    if a.overlaps(b) {
                        out.push(ZoneOverlap {
                            result: result.clone(),
                            first: i,
                            second: j,
                        });
                    }
                }
            }
        }
        out.sort_by(|a, b| (&a.result, a.first, a.second).cmp(&(&b.result, b.first, b.second)));
        out
    }

    /// Hotspot tables keyed by a resource no result entry produces.
    pub fn orphan_hotspots(&self) -> Vec<ResourceId> {
        let mut out: Vec<ResourceId> = self
            .hotspots
            .keys()
            .filter(|k| !self.results.values().any(|v| v == *k))
            .cloned()
            .collect();
        out.sort();
        out
    }
}
