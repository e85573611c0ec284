use std::sync::Arc;

use chrono::{TimeZone, Utc};
use hintgraph_space::persist::{self, CorruptGraphError, HEADER_LEN};
use hintgraph_space::*;
use hintgraph_syntax::{CanonicalTree, NestedNode, NodeKind, RuleSet, RuleSetId, SyntaxTree};
use proptest::prelude::*;

fn assign(name: &str, value: u8) -> NestedNode {
    NestedNode::new(
        NodeKind::Assign,
        None,
        vec![
            NestedNode::new(NodeKind::Name, Some(name), vec![]),
            NestedNode::new(NodeKind::Const, Some(&value.to_string()), vec![]),
        ],
    )
}

/// Walk that appends statements one at a time; the last state passes when
/// `passes` is set.
fn walk(values: &[u8], passes: bool) -> Vec<Snapshot> {
    let mut body = Vec::new();
    let mut snapshots = Vec::new();
    for (i, v) in values.iter().enumerate() {
        body.push(assign(&format!("s{i}"), *v));
        let verdict = if passes && i + 1 == values.len() {
            Some(Verdict::Passed)
        } else {
            Some(Verdict::Failed {
                passed_tests: i as u32,
                total_tests: 8,
            })
        };
        snapshots.push(Snapshot::new(
            SyntaxTree::from_nested(&NestedNode::new(NodeKind::Module, None, body.clone())),
            Utc.timestamp_opt(1_720_000_000 + 10 * i as i64, 0).unwrap(),
            verdict,
        ));
    }
    snapshots
}

fn graph_from(walks: &[(Vec<u8>, bool, Option<u8>)]) -> SolutionGraph {
    let agg = TrajectoryAggregator::new(Arc::new(RuleSet::python_v1()));
    let sessions = walks
        .iter()
        .map(|(values, passes, age)| {
            Session::new(
                "pack".into(),
                StudentProfile::new(*age, Some(Experience::FromOneToTwoYears), Some("school")),
                walk(values, *passes),
            )
        })
        .collect();
    build_graph(&agg, "pack".into(), sessions).0
}

fn sample() -> SolutionGraph {
    graph_from(&[
        (vec![1, 2, 3], true, Some(15)),
        (vec![1, 2, 4], false, None),
        (vec![1, 5], true, Some(17)),
    ])
}

#[test]
fn round_trip_through_a_file() {
    let graph = sample();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("pack.hgr");
    persist::save(&graph, &path).unwrap();
    let back = persist::load(&path).unwrap();
    assert_eq!(back, graph);
    assert_eq!(back.terminals(), graph.terminals());
    for v in graph.vertices() {
        assert_eq!(back.find_vertex(&v.state), Some(v.id));
    }
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = persist::load(&dir.path().join("absent.hgr")).unwrap_err();
    assert!(matches!(err, PersistError::Io { .. }));
}

#[test]
fn flipped_payload_byte_fails_the_checksum() {
    let mut bytes = persist::serialize(&sample()).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0x40;
    assert_eq!(persist::deserialize(&bytes), Err(CorruptGraphError::ChecksumMismatch));
}

#[test]
fn truncated_images_are_refused() {
    let bytes = persist::serialize(&sample()).unwrap();
    for cut in [HEADER_LEN - 1, HEADER_LEN, bytes.len() - 1] {
        assert!(
            matches!(
                persist::deserialize(&bytes[..cut]),
                Err(CorruptGraphError::Truncated { .. })
            ),
            "cut at {cut}"
        );
    }
}

#[test]
fn consistent_checksum_over_bad_payload_is_a_decode_error() {
    let bytes = persist::serialize(&sample()).unwrap();
    let mut payload = bytes[HEADER_LEN..].to_vec();
    payload.truncate(payload.len() / 2);

    let mut forged = Vec::new();
    forged.extend_from_slice(&bytes[0..8]);
    forged.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    forged.extend_from_slice(&sha2_digest(&payload));
    forged.extend_from_slice(&payload);
    assert!(matches!(
        persist::deserialize(&forged),
        Err(CorruptGraphError::Decode(_))
    ));
}

fn sha2_digest(bytes: &[u8]) -> [u8; 32] {
    use sha2::{Digest, Sha256};
    Sha256::digest(bytes).into()
}

/// Decoded payload, field for field (bincode encodes structs as tuples).
type Image = (TaskId, RuleSetId, Vec<Vertex>, Vec<Edge>);

fn unpack(bytes: &[u8]) -> Image {
    bincode::deserialize(&bytes[HEADER_LEN..]).unwrap()
}

/// Re-encode with a valid header and checksum.
fn reseal(image: &Image) -> Vec<u8> {
    let payload = bincode::serialize(image).unwrap();
    let mut out = Vec::new();
    out.extend_from_slice(&persist::MAGIC);
    out.extend_from_slice(&persist::FORMAT_VERSION.to_le_bytes());
    out.extend_from_slice(&(payload.len() as u64).to_le_bytes());
    out.extend_from_slice(&sha2_digest(&payload));
    out.extend_from_slice(&payload);
    out
}

fn with_root_children(state: &CanonicalTree, children: serde_json::Value) -> CanonicalTree {
    let mut json = serde_json::to_value(state).unwrap();
    json["tree"]["nodes"][0]["children"] = children;
    serde_json::from_value(json).unwrap()
}

#[test]
fn resealed_image_round_trips() {
    let bytes = persist::serialize(&sample()).unwrap();
    assert_eq!(reseal(&unpack(&bytes)), bytes);
}

#[test]
fn forged_dangling_child_is_an_invariant_error() {
    let mut image = unpack(&persist::serialize(&sample()).unwrap());
    image.2[0].state = with_root_children(&image.2[0].state, serde_json::json!([99]));
    match persist::deserialize(&reseal(&image)) {
        Err(CorruptGraphError::Invariant(msg)) => assert!(msg.contains("dangling"), "{msg}"),
        other => panic!("expected an invariant error, got {other:?}"),
    }
}

#[test]
fn forged_cycle_is_an_invariant_error() {
    let mut image = unpack(&persist::serialize(&sample()).unwrap());
    let last = image.2.len() - 1;
    image.2[last].state = with_root_children(&image.2[last].state, serde_json::json!([0]));
    match persist::deserialize(&reseal(&image)) {
        Err(CorruptGraphError::Invariant(msg)) => assert!(msg.contains("cyclic"), "{msg}"),
        other => panic!("expected an invariant error, got {other:?}"),
    }
}

#[test]
fn forged_edge_digest_is_an_invariant_error() {
    let mut image = unpack(&persist::serialize(&sample()).unwrap());
    image.3[0].edit_digest = image.3[0].edit_digest.wrapping_add(1);
    assert!(matches!(
        persist::deserialize(&reseal(&image)),
        Err(CorruptGraphError::Invariant(_))
    ));
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 64,
        failure_persistence: None,
        ..ProptestConfig::default()
    })]

    #[test]
    fn serialize_then_deserialize_is_exact(
        walks in proptest::collection::vec(
            (proptest::collection::vec(0u8..4, 1..5), any::<bool>(), proptest::option::of(10u8..30)),
            0..6,
        )
    ) {
        let graph = graph_from(&walks);
        let back = persist::deserialize(&persist::serialize(&graph).unwrap()).unwrap();
        prop_assert_eq!(back.vertex_count(), graph.vertex_count());
        prop_assert_eq!(back.terminals(), graph.terminals());
        prop_assert_eq!(&back, &graph);
    }

    #[test]
    fn any_single_bit_flip_is_detected(flip in 0usize..4096, bit in 0u8..8) {
        let bytes = persist::serialize(&sample()).unwrap();
        let mut damaged = bytes.clone();
        let at = flip % damaged.len();
        damaged[at] ^= 1 << bit;
        prop_assert!(persist::deserialize(&damaged).is_err());
    }
}
