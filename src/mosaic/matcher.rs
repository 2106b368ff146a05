//! Match engine.
//!
//! Assigns every tile of a mosaic a photo from the pool by nearest dominant
//! color (Euclidean RGB), subject to reuse and fairness policies.
//!
//! # Algorithm
//!
//! Tiles are visited in a Fisher–Yates shuffled order so repeated matches do
//! not cluster along raster order. For each tile:
//!
//! 1. Rank every photo by distance and keep the closest `match_pool_size`.
//! 2. Filter the pool by the reuse policy and the per-photo use cap.
//! 3. With `min_use_once` and before exhaustion, prefer never-used photos.
//! 4. Take the closest candidate, unless it is farther than the mismatch
//!    threshold, in which case pick uniformly among the candidates.
//!
//! If the pool yields nothing the whole photo set is searched with the same
//! rules, and as a last resort the use cap is relaxed. The assignment is
//! greedy, not globally optimal.
//!
//! Usage counters live only for one invocation. Counts keep accruing after
//! exhaustion; exhaustion only lifts the no-reuse restriction.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::MosaicError;
use crate::model::{MosaicConfig, Photo, PhotoId, Rgb, Tile, TileMatch, DEFAULT_MATCH_POOL_SIZE};
use crate::store::MosaicStore;

// =============================================================================
// Policy
// =============================================================================

/// Reuse and fairness policy applied while matching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchPolicy {
    pub allow_reuse: bool,
    pub reuse_after_exhaustion: bool,
    pub match_pool_size: usize,
    pub mismatch_distance_threshold: Option<f64>,
    pub min_use_once: bool,
    pub max_uses_per_photo: Option<u32>,
}

impl Default for MatchPolicy {
    fn default() -> Self {
        Self {
            allow_reuse: true,
            reuse_after_exhaustion: false,
            match_pool_size: DEFAULT_MATCH_POOL_SIZE,
            mismatch_distance_threshold: None,
            min_use_once: false,
            max_uses_per_photo: None,
        }
    }
}

impl MatchPolicy {
    /// Policy stored in the persisted configuration.
    pub fn from_config(config: &MosaicConfig) -> Self {
        Self {
            allow_reuse: config.allow_reuse,
            reuse_after_exhaustion: config.reuse_after_exhaustion,
            match_pool_size: config.match_pool_size,
            mismatch_distance_threshold: config.mismatch_distance_threshold,
            min_use_once: config.min_use_once,
            max_uses_per_photo: config.max_uses_per_photo,
        }
    }

    /// Clamp values into their meaningful ranges.
    ///
    /// A pool size of 0 becomes 1, a cap of 0 means "no cap", and a negative
    /// or non-finite threshold is dropped.
    pub fn normalized(mut self) -> Self {
        self.match_pool_size = self.match_pool_size.max(1);
        self.max_uses_per_photo = self.max_uses_per_photo.filter(|cap| *cap > 0);
        self.mismatch_distance_threshold = self
            .mismatch_distance_threshold
            .filter(|t| t.is_finite() && *t >= 0.0);
        self
    }
}

/// Caller overrides merged over the persisted policy.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyOverrides {
    pub allow_reuse: Option<bool>,
    pub reuse_after_exhaustion: Option<bool>,
    pub match_pool_size: Option<usize>,
    pub mismatch_distance_threshold: Option<f64>,
    pub min_use_once: Option<bool>,
    pub max_uses_per_photo: Option<u32>,
}

impl PolicyOverrides {
    pub fn apply(&self, base: MatchPolicy) -> MatchPolicy {
        MatchPolicy {
            allow_reuse: self.allow_reuse.unwrap_or(base.allow_reuse),
            reuse_after_exhaustion: self
                .reuse_after_exhaustion
                .unwrap_or(base.reuse_after_exhaustion),
            match_pool_size: self.match_pool_size.unwrap_or(base.match_pool_size),
            mismatch_distance_threshold: self
                .mismatch_distance_threshold
                .or(base.mismatch_distance_threshold),
            min_use_once: self.min_use_once.unwrap_or(base.min_use_once),
            max_uses_per_photo: self.max_uses_per_photo.or(base.max_uses_per_photo),
        }
        .normalized()
    }
}

// =============================================================================
// Engine
// =============================================================================

/// Euclidean distance between two RGB colors.
#[inline]
pub fn color_distance(a: Rgb, b: Rgb) -> f64 {
    let dr = a[0] as f64 - b[0] as f64;
    let dg = a[1] as f64 - b[1] as f64;
    let db = a[2] as f64 - b[2] as f64;
    (dr * dr + dg * dg + db * db).sqrt()
}

/// Per-photo usage within one matching pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageState {
    pub count: u32,
    pub used_once: bool,
}

/// One tile assignment, in processing order.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub tile_id: i64,
    pub photo_id: PhotoId,
    pub distance: f64,
}

#[derive(Clone, Copy)]
struct Candidate {
    index: usize,
    distance: f64,
}

/// Greedy matcher over a fixed set of eligible photos.
pub struct Matcher<'a> {
    photos: Vec<(&'a Photo, Rgb)>,
    policy: MatchPolicy,
    usage: HashMap<PhotoId, UsageState>,
    distinct_used: usize,
    distinct_total: usize,
}

impl<'a> Matcher<'a> {
    /// Build a matcher; photos that are not eligible are ignored.
    pub fn new(photos: &'a [Photo], policy: MatchPolicy) -> Self {
        let photos: Vec<(&Photo, Rgb)> = photos
            .iter()
            .filter(|p| !p.hidden)
            .filter_map(|p| p.dominant_color.map(|color| (p, color)))
            .collect();
        let mut ids: Vec<PhotoId> = photos.iter().map(|(p, _)| p.id).collect();
        ids.sort_unstable();
        ids.dedup();

        Self {
            photos,
            policy: policy.normalized(),
            usage: HashMap::new(),
            distinct_used: 0,
            distinct_total: ids.len(),
        }
    }

    /// Every distinct eligible photo has been used at least once.
    pub fn is_exhausted(&self) -> bool {
        self.distinct_total > 0 && self.distinct_used >= self.distinct_total
    }

    /// Usage recorded so far for a photo.
    pub fn usage(&self, id: PhotoId) -> UsageState {
        self.usage.get(&id).copied().unwrap_or_default()
    }

    fn eligible(&self, photo: &Photo, exhausted: bool, enforce_cap: bool) -> bool {
        let usage = self.usage(photo.id);
        let reuse_allowed =
            self.policy.allow_reuse || (self.policy.reuse_after_exhaustion && exhausted);
        if !reuse_allowed && usage.count > 0 {
            return false;
        }
        if enforce_cap {
            if let Some(cap) = self.policy.max_uses_per_photo {
                return usage.count < cap;
            }
        }
        true
    }

    /// Pick among ascending-distance candidates.
    fn select<R: Rng + ?Sized>(
        &self,
        candidates: &[Candidate],
        exhausted: bool,
        rng: &mut R,
    ) -> Option<Candidate> {
        if candidates.is_empty() {
            return None;
        }

        let unused: Vec<Candidate>;
        let considered: &[Candidate] = if self.policy.min_use_once && !exhausted {
            unused = candidates
                .iter()
                .copied()
                .filter(|c| self.usage(self.photos[c.index].0.id).count == 0)
                .collect();
            if unused.is_empty() {
                candidates
            } else {
                &unused
            }
        } else {
            candidates
        };

        let closest = considered[0];
        match self.policy.mismatch_distance_threshold {
            Some(threshold) if closest.distance > threshold => {
                Some(considered[rng.random_range(0..considered.len())])
            }
            _ => Some(closest),
        }
    }

    /// Choose a photo for one tile color and record the use.
    pub fn assign<R: Rng + ?Sized>(&mut self, color: Rgb, rng: &mut R) -> Option<(&'a Photo, f64)> {
        let mut ranked: Vec<Candidate> = self
            .photos
            .iter()
            .enumerate()
            .map(|(index, (_, photo_color))| Candidate {
                index,
                distance: color_distance(color, *photo_color),
            })
            .collect();
        // Stable sort keeps pool order deterministic for equal distances
        ranked.sort_by(|a, b| a.distance.total_cmp(&b.distance));

        let exhausted = self.is_exhausted();
        let pool_len = self.policy.match_pool_size.min(ranked.len());

        let filter = |candidates: &[Candidate], enforce_cap: bool| -> Vec<Candidate> {
            candidates
                .iter()
                .copied()
                .filter(|c| self.eligible(self.photos[c.index].0, exhausted, enforce_cap))
                .collect()
        };

        let choice = self
            .select(&filter(&ranked[..pool_len], true), exhausted, rng)
            .or_else(|| self.select(&filter(&ranked, true), exhausted, rng))
            .or_else(|| {
                if self.policy.max_uses_per_photo.is_some() {
                    self.select(&filter(&ranked, false), exhausted, rng)
                } else {
                    None
                }
            })?;

        let photo = self.photos[choice.index].0;
        let usage = self.usage.entry(photo.id).or_default();
        usage.count += 1;
        if !usage.used_once {
            usage.used_once = true;
            self.distinct_used += 1;
        }

        Some((photo, choice.distance))
    }
}

/// Match tiles against photos, visiting tiles in shuffled order.
///
/// Returns assignments in processing order. Tiles that cannot be matched
/// under the policy are left out.
pub fn assign_tiles<R: Rng + ?Sized>(
    tiles: &[Tile],
    photos: &[Photo],
    policy: MatchPolicy,
    rng: &mut R,
) -> Vec<Assignment> {
    let mut order: Vec<usize> = (0..tiles.len()).collect();
    order.shuffle(rng);

    let mut matcher = Matcher::new(photos, policy);
    let mut assignments = Vec::with_capacity(tiles.len());

    for index in order {
        let tile = &tiles[index];
        if let Some((photo, distance)) = matcher.assign(tile.color, rng) {
            assignments.push(Assignment {
                tile_id: tile.id,
                photo_id: photo.id,
                distance,
            });
        }
    }

    assignments
}

// =============================================================================
// Stored operation
// =============================================================================

/// Result of a matching pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchSummary {
    pub mosaic_key: String,
    pub matched: usize,
    /// Policy values actually applied after merging overrides
    pub policy: MatchPolicy,
}

/// Match the stored tiles of a key against the eligible photo pool.
pub async fn match_tiles(
    store: &dyn MosaicStore,
    mosaic_key: &str,
    policy: MatchPolicy,
) -> Result<MatchSummary, MosaicError> {
    let mut rng = StdRng::from_os_rng();
    match_tiles_with_rng(store, mosaic_key, policy, &mut rng).await
}

/// [`match_tiles`] with a caller-supplied random source.
pub async fn match_tiles_with_rng<R: Rng + Send>(
    store: &dyn MosaicStore,
    mosaic_key: &str,
    policy: MatchPolicy,
    rng: &mut R,
) -> Result<MatchSummary, MosaicError> {
    let policy = policy.normalized();

    let tiles = store.tiles(mosaic_key).await?;
    if tiles.is_empty() {
        return Err(MosaicError::NotFound(format!(
            "no tiles for mosaic '{}'",
            mosaic_key
        )));
    }

    let photos = store.eligible_photos().await?;
    if photos.is_empty() {
        return Err(MosaicError::NotFound(
            "no eligible photos with a dominant color".to_string(),
        ));
    }

    let assignments = assign_tiles(&tiles, &photos, policy.clone(), rng);

    let urls: HashMap<PhotoId, &str> = photos
        .iter()
        .map(|p| (p.id, p.image_url.as_str()))
        .collect();
    let matches: Vec<TileMatch> = assignments
        .iter()
        .map(|a| TileMatch {
            tile_id: a.tile_id,
            photo_id: a.photo_id,
            url: urls.get(&a.photo_id).copied().unwrap_or_default().to_string(),
        })
        .collect();

    let matched = store.update_matches(&matches).await?;

    if matched < tiles.len() {
        debug!(
            mosaic_key,
            unmatched = tiles.len() - matched,
            "Some tiles left unmatched by the reuse policy"
        );
    }
    info!(
        mosaic_key,
        tiles = tiles.len(),
        photos = photos.len(),
        matched,
        "Matched tiles to photos"
    );

    Ok(MatchSummary {
        mosaic_key: mosaic_key.to_string(),
        matched,
        policy,
    })
}
