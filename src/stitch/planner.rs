//! Stitch planning: which assets form one mosaic and how each band resamples.

use serde::{Deserialize, Serialize};

use crate::defaults::GRID_ALIGN_TOLERANCE;
use crate::metadata::{AssetMetadata, BandClass, BoundingBox, GridSignature, ProfileStore};
use crate::stitch::filename::parse_tile_index;

/// Band-name tokens that mark a band as categorical.
const CATEGORICAL_TOKENS: [&str; 7] = ["qa", "mask", "class", "label", "cloud", "flag", "scl"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GroupStatus {
    /// Grid-compatible; executable once every band has a policy
    Ready,
    /// CRS or pixel-size mismatch; needs explicit confirmation to resample
    /// onto the first selected input's grid
    RequiresReproject,
    /// Same CRS but misaligned origins; needs explicit confirmation to
    /// partition along native grid boundaries
    RequiresSplit,
}

/// One planned mosaic group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StitchGroup {
    pub asset_ids: Vec<String>,
    pub target_extent: Option<BoundingBox>,
    /// First selected input's grid; the reproject target when status demands it.
    pub target_grid: Option<GridSignature>,
    /// Per-band resampling policy; `None` means unclassified and blocking.
    pub band_policies: Vec<Option<BandClass>>,
    pub status: GroupStatus,
    /// Filename tile tokens corroborated the geometric grouping.
    pub filename_corroborated: bool,
}

impl StitchGroup {
    /// Why this group cannot execute yet; empty means executable.
    pub fn blocking_reasons(&self) -> Vec<String> {
        let mut reasons = Vec::new();
        match self.status {
            GroupStatus::Ready => {}
            GroupStatus::RequiresReproject => reasons.push(
                "Assets do not share a CRS/pixel grid; confirm resampling onto the first input's grid.".into(),
            ),
            GroupStatus::RequiresSplit => reasons.push(
                "Assets share a CRS but their grids are misaligned; confirm splitting along native grid boundaries.".into(),
            ),
        }
        let unclassified: Vec<String> = self
            .band_policies
            .iter()
            .enumerate()
            .filter(|(_, policy)| policy.is_none())
            .map(|(index, _)| format!("band {}", index + 1))
            .collect();
        if !unclassified.is_empty() {
            reasons.push(format!(
                "No resampling policy for {}; classify them in the provider profile.",
                unclassified.join(", ")
            ));
        }
        reasons
    }

    pub fn executable(&self) -> bool {
        self.blocking_reasons().is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StitchPlan {
    pub groups: Vec<StitchGroup>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PlanOutcome {
    Stitch(StitchPlan),
    NoStitch,
}

/// Group assets that form mosaics and derive each group's execution terms.
///
/// Grouping is transitive over pairwise adjacency: A-B and B-C overlap puts
/// A/B/C in one group even when A and C do not touch.
pub fn plan(assets: &[AssetMetadata], profiles: &ProfileStore) -> PlanOutcome {
    if assets.len() < 2 {
        return PlanOutcome::NoStitch;
    }

    let mut parents: Vec<usize> = (0..assets.len()).collect();
    let mut corroborated = vec![false; assets.len()];

    let indices: Vec<_> = assets
        .iter()
        .map(|asset| parse_tile_index(&asset.path))
        .collect();

    for i in 0..assets.len() {
        for j in (i + 1)..assets.len() {
            if !spatially_related(&assets[i], &assets[j]) {
                continue;
            }
            union(&mut parents, i, j);
            if let (Some(a), Some(b)) = (&indices[i], &indices[j]) {
                if a.adjacent_to(b) {
                    corroborated[i] = true;
                    corroborated[j] = true;
                }
            }
        }
    }

    let roots: Vec<usize> = (0..assets.len())
        .map(|index| find(&mut parents, index))
        .collect();
    let mut groups: Vec<Vec<usize>> = Vec::new();
    let mut group_of_root: std::collections::HashMap<usize, usize> =
        std::collections::HashMap::new();
    for (index, &root) in roots.iter().enumerate() {
        let slot = *group_of_root.entry(root).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[slot].push(index);
    }

    let stitch_groups: Vec<StitchGroup> = groups
        .into_iter()
        .filter(|members| members.len() >= 2)
        .map(|members| build_group(assets, &members, &corroborated, profiles))
        .collect();

    if stitch_groups.is_empty() {
        PlanOutcome::NoStitch
    } else {
        PlanOutcome::Stitch(StitchPlan {
            groups: stitch_groups,
        })
    }
}

/// Extents intersect or share an edge within a tolerance derived from pixel
/// size. Filename tokens alone never relate two assets.
fn spatially_related(a: &AssetMetadata, b: &AssetMetadata) -> bool {
    let (Some(extent_a), Some(extent_b)) = (&a.extent, &b.extent) else {
        return false;
    };
    let tolerance = adjacency_tolerance(a, b);
    extent_a.intersects(extent_b) || extent_a.touches_edge(extent_b, tolerance)
}

fn adjacency_tolerance(a: &AssetMetadata, b: &AssetMetadata) -> f64 {
    let pixel = a
        .pixel_size_m
        .into_iter()
        .chain(b.pixel_size_m)
        .fold(0.0_f64, f64::max);
    if pixel > 0.0 {
        pixel * 0.5
    } else {
        1e-9
    }
}

fn build_group(
    assets: &[AssetMetadata],
    members: &[usize],
    corroborated: &[bool],
    profiles: &ProfileStore,
) -> StitchGroup {
    let group_assets: Vec<&AssetMetadata> = members.iter().map(|&index| &assets[index]).collect();

    let target_extent = group_assets
        .iter()
        .filter_map(|asset| asset.extent)
        .reduce(|acc, extent| acc.union(&extent));
    let target_grid = group_assets.iter().find_map(|asset| asset.grid.clone());
    let status = grid_status(&group_assets);
    let band_policies = classify_bands(&group_assets, profiles);

    StitchGroup {
        asset_ids: group_assets.iter().map(|asset| asset.asset_id()).collect(),
        target_extent,
        target_grid,
        band_policies,
        status,
        filename_corroborated: members.iter().any(|&index| corroborated[index]),
    }
}

fn grid_status(assets: &[&AssetMetadata]) -> GroupStatus {
    let grids: Vec<&GridSignature> = assets.iter().filter_map(|asset| asset.grid.as_ref()).collect();
    if grids.len() < assets.len() {
        // Unverifiable grids cannot silently pass; resampling onto the
        // reference grid is the conservative resolution.
        return GroupStatus::RequiresReproject;
    }
    let reference = grids[0];
    for grid in &grids[1..] {
        if grid.crs != reference.crs || !grid.same_spacing(reference, GRID_ALIGN_TOLERANCE) {
            return GroupStatus::RequiresReproject;
        }
    }
    for grid in &grids[1..] {
        if !grid.compatible_with(reference, GRID_ALIGN_TOLERANCE) {
            return GroupStatus::RequiresSplit;
        }
    }
    GroupStatus::Ready
}

fn classify_bands(assets: &[&AssetMetadata], profiles: &ProfileStore) -> Vec<Option<BandClass>> {
    let band_count = assets
        .iter()
        .filter_map(|asset| asset.band_count)
        .max()
        .unwrap_or(0) as usize;
    if band_count == 0 {
        return Vec::new();
    }

    let band_names = assets.iter().find_map(|asset| asset.band_names.as_ref());
    let profile = assets.iter().find_map(|asset| {
        let sensor = asset.sensor.as_deref()?;
        profiles.get(asset.provider, sensor)
    });

    (0..band_count)
        .map(|index| {
            if let Some(profile) = profile {
                if let Some(class) = profile.band_classes.get(&(index as u32)) {
                    return Some(*class);
                }
            }
            let name = band_names.and_then(|names| names.get(index));
            match name {
                Some(name) => {
                    let lowered = name.to_lowercase();
                    if CATEGORICAL_TOKENS.iter().any(|token| lowered.contains(token)) {
                        Some(BandClass::Categorical)
                    } else {
                        Some(BandClass::Continuous)
                    }
                }
                None => None,
            }
        })
        .collect()
}

fn find(parents: &mut Vec<usize>, index: usize) -> usize {
    let mut root = index;
    while parents[root] != root {
        root = parents[root];
    }
    let mut current = index;
    while parents[current] != root {
        let next = parents[current];
        parents[current] = root;
        current = next;
    }
    root
}

fn union(parents: &mut Vec<usize>, a: usize, b: usize) {
    let root_a = find(parents, a);
    let root_b = find(parents, b);
    if root_a != root_b {
        parents[root_b] = root_a;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::Provider;
    use std::path::PathBuf;

    fn sentinel_tile(name: &str, min_x: f64, min_y: f64, size: f64) -> AssetMetadata {
        let mut asset = AssetMetadata::unknown(PathBuf::from(format!("/data/{name}.tif")));
        asset.provider = Provider::Sentinel2;
        asset.sensor = Some("MSI-L2A".into());
        asset.band_count = Some(4);
        asset.band_names = Some(vec!["B02".into(), "B03".into(), "B04".into(), "B08".into()]);
        asset.pixel_size_m = Some(10.0);
        asset.crs = Some("EPSG:32633".into());
        asset.extent = Some(BoundingBox::new(min_x, min_y, min_x + size, min_y + size));
        asset.grid = Some(GridSignature {
            crs: "EPSG:32633".into(),
            origin_x: min_x,
            origin_y: min_y + size,
            pixel_width: 10.0,
            pixel_height: -10.0,
        });
        asset
    }

    fn empty_profiles() -> ProfileStore {
        let dir = std::env::temp_dir().join("satlift-planner-tests-none.json");
        ProfileStore::open(dir)
    }

    #[test]
    fn test_three_overlapping_tiles_form_one_group() {
        let assets = vec![
            sentinel_tile("t_r0_c0", 0.0, 0.0, 1000.0),
            sentinel_tile("t_r0_c1", 990.0, 0.0, 1000.0),
            sentinel_tile("t_r0_c2", 1980.0, 0.0, 1000.0),
        ];
        let outcome = plan(&assets, &empty_profiles());
        let PlanOutcome::Stitch(plan) = outcome else {
            panic!("expected a stitch plan");
        };
        assert_eq!(plan.groups.len(), 1);
        let group = &plan.groups[0];
        assert_eq!(group.asset_ids.len(), 3);
        assert_eq!(group.status, GroupStatus::Ready);
        assert!(group.executable());
        assert!(group
            .band_policies
            .iter()
            .all(|policy| *policy == Some(BandClass::Continuous)));
    }

    #[test]
    fn test_transitive_grouping() {
        // A touches B, B touches C, A and C are apart.
        let assets = vec![
            sentinel_tile("a", 0.0, 0.0, 1000.0),
            sentinel_tile("b", 1000.0, 0.0, 1000.0),
            sentinel_tile("c", 2000.0, 0.0, 1000.0),
        ];
        let PlanOutcome::Stitch(plan) = plan(&assets, &empty_profiles()) else {
            panic!("expected a stitch plan");
        };
        assert_eq!(plan.groups.len(), 1);
        assert_eq!(plan.groups[0].asset_ids.len(), 3);
    }

    #[test]
    fn test_disjoint_assets_do_not_stitch() {
        let assets = vec![
            sentinel_tile("a", 0.0, 0.0, 1000.0),
            sentinel_tile("b", 50000.0, 50000.0, 1000.0),
        ];
        assert!(matches!(
            plan(&assets, &empty_profiles()),
            PlanOutcome::NoStitch
        ));
    }

    #[test]
    fn test_filename_similarity_alone_never_groups() {
        // Same r/c naming scheme, far apart on the ground.
        let mut a = sentinel_tile("scene_r0_c0", 0.0, 0.0, 1000.0);
        let mut b = sentinel_tile("scene_r0_c1", 80000.0, 0.0, 1000.0);
        a.scene_id = None;
        b.scene_id = None;
        assert!(matches!(
            plan(&[a, b], &empty_profiles()),
            PlanOutcome::NoStitch
        ));
    }

    #[test]
    fn test_crs_mismatch_marks_requires_reproject() {
        let a = sentinel_tile("a", 0.0, 0.0, 1000.0);
        let mut b = sentinel_tile("b", 1000.0, 0.0, 1000.0);
        if let Some(grid) = b.grid.as_mut() {
            grid.crs = "EPSG:32634".into();
        }
        b.crs = Some("EPSG:32634".into());

        let PlanOutcome::Stitch(plan) = plan(&[a, b], &empty_profiles()) else {
            panic!("expected a stitch plan");
        };
        let group = &plan.groups[0];
        assert_eq!(group.status, GroupStatus::RequiresReproject);
        assert!(!group.executable());
        assert!(!group.blocking_reasons().is_empty());
    }

    #[test]
    fn test_misaligned_origin_marks_requires_split() {
        let a = sentinel_tile("a", 0.0, 0.0, 1000.0);
        let mut b = sentinel_tile("b", 1000.0, 0.0, 1000.0);
        if let Some(grid) = b.grid.as_mut() {
            grid.origin_x += 3.7; // sub-pixel offset
        }
        let PlanOutcome::Stitch(plan) = plan(&[a, b], &empty_profiles()) else {
            panic!("expected a stitch plan");
        };
        assert_eq!(plan.groups[0].status, GroupStatus::RequiresSplit);
    }

    #[test]
    fn test_unknown_grid_is_not_silently_ready() {
        let a = sentinel_tile("a", 0.0, 0.0, 1000.0);
        let mut b = sentinel_tile("b", 1000.0, 0.0, 1000.0);
        b.grid = None;
        let PlanOutcome::Stitch(plan) = plan(&[a, b], &empty_profiles()) else {
            panic!("expected a stitch plan");
        };
        assert_eq!(plan.groups[0].status, GroupStatus::RequiresReproject);
    }

    #[test]
    fn test_qa_band_is_categorical_and_unnamed_band_blocks() {
        let mut a = sentinel_tile("a", 0.0, 0.0, 1000.0);
        let mut b = sentinel_tile("b", 1000.0, 0.0, 1000.0);
        for asset in [&mut a, &mut b] {
            asset.band_count = Some(5);
            asset.band_names = Some(vec![
                "B02".into(),
                "B03".into(),
                "B04".into(),
                "B08".into(),
                "SCL".into(),
            ]);
        }
        let PlanOutcome::Stitch(first) = plan(&[a.clone(), b.clone()], &empty_profiles()) else {
            panic!("expected a stitch plan");
        };
        assert_eq!(
            first.groups[0].band_policies[4],
            Some(BandClass::Categorical)
        );
        assert!(first.groups[0].executable());

        for asset in [&mut a, &mut b] {
            asset.band_count = Some(6);
        }
        let PlanOutcome::Stitch(second) = plan(&[a, b], &empty_profiles()) else {
            panic!("expected a stitch plan");
        };
        let group = &second.groups[0];
        assert_eq!(group.band_policies[5], None);
        assert!(!group.executable());
        assert!(group
            .blocking_reasons()
            .iter()
            .any(|reason| reason.contains("band 6")));
    }

    #[test]
    fn test_corroboration_flag_set_for_grid_named_tiles() {
        let assets = vec![
            sentinel_tile("t_r0_c0", 0.0, 0.0, 1000.0),
            sentinel_tile("t_r0_c1", 1000.0, 0.0, 1000.0),
        ];
        let PlanOutcome::Stitch(plan) = plan(&assets, &empty_profiles()) else {
            panic!("expected a stitch plan");
        };
        assert!(plan.groups[0].filename_corroborated);
    }
}
