// tests/property/scheduler.rs

use std::collections::{BTreeSet, HashSet};

use proptest::prelude::*;
use workstream::dag::{WaveScheduler, WorkstreamBundle};
use workstream::errors::WorkstreamError;
use workstream_test_utils::builders::BundleBuilder;

const FILES: [&str; 6] = ["f0", "f1", "f2", "f3", "f4", "f5"];
const GROUPS: [&str; 3] = ["g0", "g1", "g2"];

/// Raw per-bundle choices: candidate deps, file picks, optional group, solo.
type RawBundle = (Vec<usize>, Vec<usize>, Option<usize>, bool);

// Strategy for acyclic bundle sets: bundle N may only depend on bundles
// 0..N-1.
fn bundle_set_strategy(max_bundles: usize) -> impl Strategy<Value = Vec<WorkstreamBundle>> {
    (1..=max_bundles).prop_flat_map(|n| {
        proptest::collection::vec(
            (
                proptest::collection::vec(any::<usize>(), 0..3),
                proptest::collection::vec(0..FILES.len(), 0..3),
                proptest::option::of(0..GROUPS.len()),
                proptest::bool::weighted(0.1),
            ),
            n,
        )
        .prop_map(|raw: Vec<RawBundle>| {
            raw.into_iter()
                .enumerate()
                .map(|(i, (deps, files, group, solo))| {
                    let mut b = BundleBuilder::new(&format!("b{i}"));
                    if i > 0 {
                        for d in deps.into_iter().map(|d| d % i).collect::<BTreeSet<_>>() {
                            b = b.after(&format!("b{d}"));
                        }
                    }
                    let picks: Vec<&str> = files.into_iter().map(|f| FILES[f]).collect();
                    b = b.files(&picks);
                    if let Some(g) = group {
                        b = b.group(GROUPS[g]);
                    }
                    if solo {
                        b = b.solo();
                    }
                    b.build()
                })
                .collect()
        })
    })
}

proptest! {
    #[test]
    fn every_dependency_lands_in_an_earlier_wave(
        bundles in bundle_set_strategy(12),
        cap in 1usize..5,
    ) {
        let plan = WaveScheduler::new(cap).unwrap().plan(&bundles).unwrap();

        prop_assert_eq!(plan.bundle_count(), bundles.len());
        for b in &bundles {
            let wave = plan.wave_of(&b.id).expect("every bundle is scheduled");
            for dep in &b.depends_on {
                let dep_wave = plan.wave_of(dep).expect("dependency is scheduled");
                prop_assert!(dep_wave < wave, "{} (wave {}) depends on {} (wave {})", b.id, wave, dep, dep_wave);
            }
        }
    }

    #[test]
    fn wave_members_never_share_files_or_groups(
        bundles in bundle_set_strategy(12),
        cap in 1usize..5,
    ) {
        let plan = WaveScheduler::new(cap).unwrap().plan(&bundles).unwrap();

        for wave in &plan.waves {
            prop_assert!(wave.len() <= cap);

            let mut files = HashSet::new();
            let mut groups = HashSet::new();
            for id in &wave.bundle_ids {
                let b = plan.bundle(id).unwrap();
                for f in b.claimed_files() {
                    prop_assert!(files.insert(f.clone()), "file {} shared in wave {}", f, wave.index);
                }
                if let Some(g) = b.group() {
                    prop_assert!(groups.insert(g.to_string()), "group {} shared in wave {}", g, wave.index);
                }
                if !b.parallel_ok {
                    prop_assert_eq!(wave.len(), 1);
                }
            }
        }
    }

    #[test]
    fn closing_the_chain_always_yields_a_cycle(n in 2usize..8) {
        // b0 <- b1 <- ... <- b(n-1), plus b0 depending on the last one.
        let bundles: Vec<WorkstreamBundle> = (0..n)
            .map(|i| {
                let dep = if i == 0 { n - 1 } else { i - 1 };
                BundleBuilder::new(&format!("b{i}")).after(&format!("b{dep}")).build()
            })
            .collect();

        let err = WaveScheduler::new(4).unwrap().plan(&bundles).unwrap_err();
        match err {
            WorkstreamError::Cycle(ids) => prop_assert_eq!(ids.len(), n),
            other => prop_assert!(false, "expected cycle, got {:?}", other),
        }
    }
}
