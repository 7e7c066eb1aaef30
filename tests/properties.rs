//! Property tests for the scoring math.

use std::collections::HashMap;
use std::sync::Arc;

use proptest::prelude::*;

use tagwise::model::{LabelId, PairKey, TagId, WeightSnapshot};
use tagwise::predictor::{Predictor, softmax};

fn score_maps() -> impl Strategy<Value = HashMap<LabelId, f64>> {
    prop::collection::hash_map(0i64..64, -500.0f64..500.0, 1..8)
        .prop_map(|m| m.into_iter().map(|(id, s)| (LabelId(id), s)).collect())
}

fn snapshots() -> impl Strategy<Value = WeightSnapshot> {
    let labels = prop::collection::hash_map(0i64..8, "[a-z]{1,8}", 1..4);
    let tags = prop::collection::hash_map("[a-z]{1,8}", 0i64..32, 0..16);
    let weights =
        prop::collection::hash_map((0i64..32, 0i64..8), -10.0f64..10.0, 0..48);
    (labels, tags, weights).prop_map(|(labels, tags, weights)| {
        let labels: HashMap<LabelId, String> = labels
            .into_iter()
            .map(|(id, name)| (LabelId(id), name))
            .collect();
        let label_thresholds = labels.keys().map(|id| (*id, 0.5)).collect();
        WeightSnapshot {
            tag_ids: tags.into_iter().map(|(n, id)| (n, TagId(id))).collect(),
            tag_weights: weights
                .into_iter()
                .filter(|((_, l), _)| labels.contains_key(&LabelId(*l)))
                .map(|((t, l), w)| ((TagId(t), LabelId(l)), w))
                .collect(),
            labels,
            pair_weights: HashMap::new(),
            pair_multiplier: 0.5,
            min_confidence: 0.5,
            label_thresholds,
            max_tags_for_pairs: 100,
        }
    })
}

proptest! {
    #[test]
    fn softmax_is_a_probability_distribution(scores in score_maps()) {
        let probs = softmax(&scores);
        prop_assert_eq!(probs.len(), scores.len());

        let sum: f64 = probs.values().sum();
        prop_assert!((sum - 1.0).abs() < 1e-9, "sum was {}", sum);
        for p in probs.values() {
            prop_assert!(p.is_finite());
            prop_assert!(*p >= 0.0 && *p <= 1.0);
        }
    }

    #[test]
    fn softmax_preserves_score_ordering(scores in score_maps()) {
        let probs = softmax(&scores);
        for (a, sa) in &scores {
            for (b, sb) in &scores {
                if sa > sb {
                    prop_assert!(probs[a] >= probs[b]);
                }
            }
        }
    }

    #[test]
    fn pair_key_is_order_insensitive(a in 0i64..10_000, b in 0i64..10_000) {
        let forward = PairKey::new(TagId(a), TagId(b));
        let reverse = PairKey::new(TagId(b), TagId(a));
        prop_assert_eq!(forward, reverse);
        prop_assert!(forward.first <= forward.second);
    }

    #[test]
    fn scoring_ignores_tag_order_and_duplicates(
        snapshot in snapshots(),
        mut tags in prop::collection::vec("[a-z]{1,8}", 0..12),
    ) {
        let predictor = Predictor::new(Arc::new(snapshot));
        let baseline = predictor.score(&tags);

        tags.reverse();
        if let Some(first) = tags.first().cloned() {
            tags.push(first);
        }
        prop_assert_eq!(predictor.score(&tags), baseline);
    }

    #[test]
    fn confidence_is_always_a_probability(
        snapshot in snapshots(),
        tags in prop::collection::vec("[a-z]{1,8}", 0..12),
    ) {
        let predictor = Predictor::new(Arc::new(snapshot));
        let prediction = predictor.predict(&tags);
        prop_assert!(prediction.confidence >= 0.0 && prediction.confidence <= 1.0);
        if let Some(label) = &prediction.label {
            prop_assert!(prediction.probabilities.contains_key(label));
        }
    }
}
