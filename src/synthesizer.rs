//! Synthetic attack generation
//!
//! All random choices for a batch are drawn up front. Only the geolocation
//! of source and target addresses is awaited, and those lookups run
//! concurrently across the whole batch.

use chrono::Utc;
use futures::future::join_all;
use rand::distributions::{Distribution, WeightedError, WeightedIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::debug;

use crate::config::GenerationConfig;
use crate::events::{AttackEvent, AttackType, Intensity};
use crate::geoip::GeoResolver;

/// Attack types weighted by how common they are in the wild
pub const ATTACK_TYPE_WEIGHTS: &[(AttackType, u32)] = &[
    (AttackType::HttpFlood, 5),
    (AttackType::UdpFlood, 3),
    (AttackType::SynFlood, 2),
    (AttackType::DnsAmplification, 1),
    (AttackType::NtpAmplification, 1),
    (AttackType::IcmpFlood, 1),
];

/// Target pools by infrastructure category
pub const TARGET_POOLS: &[(&str, &[&str])] = &[
    ("dns", &["8.8.8.8", "1.1.1.1", "9.9.9.9"]),
    ("cdn", &["104.16.249.249", "151.101.1.140"]),
    ("cloud", &["13.107.42.14", "172.217.14.206"]),
];

/// /24 prefixes that attack sources are drawn from
pub const MALICIOUS_PREFIXES: &[&str] = &[
    "45.95.169",
    "185.220.101",
    "198.98.51",
    "107.189.10",
    "194.58.56",
    "37.252.64",
    "89.248.167",
    "91.240.118",
];

#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("invalid weight table: {0}")]
    Weights(#[from] WeightedError),
    #[error("batch range {min}..={max} is empty")]
    BatchRange { min: usize, max: usize },
    #[error("random source poisoned by an earlier panic")]
    RngPoisoned,
}

/// Everything about an event that doesn't need a network round trip
#[derive(Debug, Clone)]
struct Draft {
    source_address: String,
    target_address: String,
    attack_type: AttackType,
    intensity: Intensity,
    duration_seconds: u32,
    packet_count: u32,
    bandwidth_mbps: u32,
}

pub struct Synthesizer {
    geo: Arc<GeoResolver>,
    min_batch: usize,
    max_batch: usize,
    attack_types: WeightedIndex<u32>,
    intensities: WeightedIndex<u32>,
    rng: Mutex<StdRng>,
    batch_seq: AtomicU64,
}

impl Synthesizer {
    /// Seeds from `config.seed` when set, otherwise from OS entropy
    pub fn new(geo: Arc<GeoResolver>, config: &GenerationConfig) -> Result<Self, SynthesisError> {
        match config.seed {
            Some(seed) => Self::seeded(geo, config, seed),
            None => Self::with_rng(geo, config, StdRng::from_entropy()),
        }
    }

    /// Same as [`Synthesizer::new`] with a fixed seed, for reproducible runs
    pub fn seeded(geo: Arc<GeoResolver>, config: &GenerationConfig, seed: u64) -> Result<Self, SynthesisError> {
        Self::with_rng(geo, config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(geo: Arc<GeoResolver>, config: &GenerationConfig, rng: StdRng) -> Result<Self, SynthesisError> {
        if config.min_batch > config.max_batch {
            return Err(SynthesisError::BatchRange {
                min: config.min_batch,
                max: config.max_batch,
            });
        }

        let attack_types = WeightedIndex::new(ATTACK_TYPE_WEIGHTS.iter().map(|(_, w)| *w))?;
        let w = &config.intensity_weights;
        let intensities = WeightedIndex::new([w.low, w.medium, w.high, w.critical])?;

        Ok(Self {
            geo,
            min_batch: config.min_batch,
            max_batch: config.max_batch,
            attack_types,
            intensities,
            rng: Mutex::new(rng),
            batch_seq: AtomicU64::new(0),
        })
    }

    /// Produce one batch of fully resolved events
    pub async fn synthesize_batch(&self) -> Result<Vec<AttackEvent>, SynthesisError> {
        let drafts = self.draft_batch()?;
        let seq = self.batch_seq.fetch_add(1, Ordering::Relaxed);

        let located = join_all(drafts.into_iter().map(|draft| async move {
            let (source, target) = futures::join!(
                self.geo.resolve(&draft.source_address),
                self.geo.resolve(&draft.target_address)
            );
            (draft, source, target)
        }))
        .await;

        let created_at = Utc::now();
        let millis = created_at.timestamp_millis();
        let events: Vec<AttackEvent> = located
            .into_iter()
            .enumerate()
            .map(|(i, (draft, source_location, target_location))| AttackEvent {
                id: format!("attack_{}_{}_{}", millis, seq, i),
                source_address: draft.source_address,
                target_address: draft.target_address,
                source_location,
                target_location,
                attack_type: draft.attack_type,
                intensity: draft.intensity,
                created_at,
                duration_seconds: draft.duration_seconds,
                packet_count: draft.packet_count,
                bandwidth_mbps: draft.bandwidth_mbps,
            })
            .collect();

        debug!("Synthesized batch {} with {} events", seq, events.len());
        Ok(events)
    }

    fn draft_batch(&self) -> Result<Vec<Draft>, SynthesisError> {
        let mut rng = self.rng.lock().map_err(|_| SynthesisError::RngPoisoned)?;
        let count = rng.gen_range(self.min_batch..=self.max_batch);
        Ok((0..count).map(|_| self.draft(&mut *rng)).collect())
    }

    fn draft<R: Rng + ?Sized>(&self, rng: &mut R) -> Draft {
        let prefix = MALICIOUS_PREFIXES[rng.gen_range(0..MALICIOUS_PREFIXES.len())];
        let source_address = format!("{}.{}", prefix, rng.gen_range(0..255u8));

        let (_, pool) = TARGET_POOLS[rng.gen_range(0..TARGET_POOLS.len())];
        let target_address = pool[rng.gen_range(0..pool.len())].to_string();

        Draft {
            source_address,
            target_address,
            attack_type: ATTACK_TYPE_WEIGHTS[self.attack_types.sample(&mut *rng)].0,
            intensity: Intensity::ALL[self.intensities.sample(&mut *rng)],
            duration_seconds: rng.gen_range(30..330),
            packet_count: rng.gen_range(10_000..110_000),
            bandwidth_mbps: rng.gen_range(100..1100),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IntensityWeights;
    use crate::events::fixtures;
    use crate::geoip::stubs::{fast_config, FixedLookup, HangingLookup};
    use std::collections::{HashMap, HashSet};

    fn resolver_with(lookup: Arc<dyn crate::geoip::GeoLookup>) -> Arc<GeoResolver> {
        Arc::new(GeoResolver::new(vec![lookup], &fast_config()))
    }

    fn synthesizer(config: &GenerationConfig) -> Synthesizer {
        let geo = resolver_with(Arc::new(FixedLookup::new(fixtures::location("US"))));
        Synthesizer::seeded(geo, config, 7).unwrap()
    }

    #[tokio::test]
    async fn batch_fields_are_in_range() {
        let synth = synthesizer(&GenerationConfig::default());
        let targets: HashSet<&str> = TARGET_POOLS.iter().flat_map(|(_, p)| p.iter().copied()).collect();

        for _ in 0..20 {
            let batch = synth.synthesize_batch().await.unwrap();
            assert!((3..=10).contains(&batch.len()));

            for event in &batch {
                assert!((30..330).contains(&event.duration_seconds));
                assert!((10_000..110_000).contains(&event.packet_count));
                assert!((100..1100).contains(&event.bandwidth_mbps));
                assert!(targets.contains(event.target_address.as_str()));

                let (prefix, octet) = event.source_address.rsplit_once('.').unwrap();
                assert!(MALICIOUS_PREFIXES.contains(&prefix));
                assert!(octet.parse::<u8>().unwrap() < 255);

                assert_eq!(event.target_location.country, "US");
            }
        }
    }

    #[tokio::test]
    async fn ids_are_unique_across_batches() {
        let synth = synthesizer(&GenerationConfig::default());
        let mut seen = HashSet::new();
        for _ in 0..10 {
            for event in synth.synthesize_batch().await.unwrap() {
                assert!(seen.insert(event.id.clone()), "duplicate id {}", event.id);
            }
        }
    }

    #[tokio::test]
    async fn fixed_batch_size() {
        let config = GenerationConfig {
            min_batch: 5,
            max_batch: 5,
            ..GenerationConfig::default()
        };
        let batch = synthesizer(&config).synthesize_batch().await.unwrap();
        assert_eq!(batch.len(), 5);
    }

    #[tokio::test]
    async fn critical_only_weights_produce_critical() {
        let config = GenerationConfig {
            intensity_weights: IntensityWeights {
                low: 0,
                medium: 0,
                high: 0,
                critical: 1,
            },
            ..GenerationConfig::default()
        };
        let batch = synthesizer(&config).synthesize_batch().await.unwrap();
        assert!(batch.iter().all(|e| e.intensity == Intensity::Critical));
    }

    #[test]
    fn attack_type_draws_follow_weights() {
        let synth = synthesizer(&GenerationConfig::default());
        let mut rng = StdRng::seed_from_u64(42);
        let mut counts: HashMap<AttackType, usize> = HashMap::new();
        for _ in 0..13_000 {
            *counts.entry(synth.draft(&mut rng).attack_type).or_default() += 1;
        }

        let http = counts[&AttackType::HttpFlood];
        let icmp = counts[&AttackType::IcmpFlood];
        assert!(http > counts[&AttackType::UdpFlood]);
        assert!(counts[&AttackType::UdpFlood] > counts[&AttackType::SynFlood]);
        // expected 5000 vs 1000
        assert!(http > icmp * 3, "http={} icmp={}", http, icmp);
    }

    #[test]
    fn every_intensity_reachable_by_default() {
        let synth = synthesizer(&GenerationConfig::default());
        let mut rng = StdRng::seed_from_u64(1);
        let seen: HashSet<Intensity> = (0..1000).map(|_| synth.draft(&mut rng).intensity).collect();
        assert_eq!(seen.len(), 4);
    }

    #[tokio::test]
    async fn configured_seed_reproduces_the_stream() {
        let config = GenerationConfig {
            seed: Some(99),
            ..GenerationConfig::default()
        };
        let make = || {
            let geo = resolver_with(Arc::new(FixedLookup::new(fixtures::location("US"))));
            Synthesizer::new(geo, &config).unwrap()
        };
        let fingerprint = |batch: Vec<AttackEvent>| -> Vec<(String, String, AttackType, Intensity)> {
            batch
                .into_iter()
                .map(|e| (e.source_address, e.target_address, e.attack_type, e.intensity))
                .collect()
        };

        let (a, b) = (make(), make());
        for _ in 0..3 {
            let left = fingerprint(a.synthesize_batch().await.unwrap());
            let right = fingerprint(b.synthesize_batch().await.unwrap());
            assert_eq!(left, right);
        }
    }

    #[test]
    fn rejects_all_zero_intensity_weights() {
        let config = GenerationConfig {
            intensity_weights: IntensityWeights {
                low: 0,
                medium: 0,
                high: 0,
                critical: 0,
            },
            ..GenerationConfig::default()
        };
        let geo = resolver_with(Arc::new(FixedLookup::new(fixtures::location("US"))));
        assert!(matches!(Synthesizer::new(geo, &config), Err(SynthesisError::Weights(_))));
    }

    #[tokio::test]
    async fn timed_out_lookups_still_complete_batch() {
        let synth = Synthesizer::seeded(resolver_with(Arc::new(HangingLookup)), &GenerationConfig::default(), 3).unwrap();
        let started = std::time::Instant::now();
        let batch = synth.synthesize_batch().await.unwrap();

        assert!(!batch.is_empty());
        // lookups run concurrently, so the whole batch costs roughly one timeout
        assert!(started.elapsed() < std::time::Duration::from_secs(2));
        for event in &batch {
            assert_eq!(event.target_location.city, "unknown");
            assert!(event.target_location.has_valid_coordinates());
            assert!(event.source_location.has_valid_coordinates());
        }
    }
}
