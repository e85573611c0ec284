use std::sync::Arc;

use hintgraph_syntax::*;
use proptest::prelude::*;

fn n(kind: NodeKind, value: Option<&str>, children: Vec<NestedNode>) -> NestedNode {
    NestedNode::new(kind, value, children)
}

fn ident() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("a".to_string()),
        Just("b".to_string()),
        Just("total".to_string()),
        Just("i".to_string()),
        Just("answer".to_string()),
    ]
}

fn expr() -> impl Strategy<Value = NestedNode> {
    let leaf = prop_oneof![
        ident().prop_map(|v| n(NodeKind::Name, Some(&v), vec![])),
        prop_oneof![Just("0"), Just("1"), Just("2"), Just("10"), Just("\"s\"")]
            .prop_map(|v| n(NodeKind::Const, Some(v), vec![])),
    ];
    leaf.prop_recursive(3, 24, 3, |inner| {
        prop_oneof![
            (
                prop_oneof![Just("+"), Just("-"), Just("*")],
                inner.clone(),
                inner.clone()
            )
                .prop_map(|(op, l, r)| n(NodeKind::BinOp, Some(op), vec![l, r])),
            (
                prop_oneof![Just("<"), Just(">"), Just("=="), Just(">=")],
                inner.clone(),
                inner.clone()
            )
                .prop_map(|(op, l, r)| n(NodeKind::Compare, Some(op), vec![l, r])),
            inner
                .clone()
                .prop_map(|e| n(NodeKind::Paren, None, vec![e])),
            inner
                .clone()
                .prop_map(|e| n(NodeKind::UnaryOp, Some("not"), vec![e])),
            (
                prop_oneof![Just("and"), Just("or")],
                proptest::collection::vec(inner.clone(), 2..=3)
            )
                .prop_map(|(op, xs)| n(NodeKind::BoolOp, Some(op), xs)),
            proptest::collection::vec(inner, 0..=2).prop_map(|args| {
                let mut children = vec![n(NodeKind::Name, Some("print"), vec![])];
                children.extend(args);
                n(NodeKind::Call, None, children)
            }),
        ]
    })
}

fn simple_stmt() -> impl Strategy<Value = NestedNode> {
    prop_oneof![
        (ident(), expr()).prop_map(|(v, e)| n(
            NodeKind::Assign,
            None,
            vec![n(NodeKind::Name, Some(&v), vec![]), e]
        )),
        (ident(), expr()).prop_map(|(v, e)| n(
            NodeKind::AugAssign,
            Some("+"),
            vec![n(NodeKind::Name, Some(&v), vec![]), e]
        )),
        expr().prop_map(|e| n(NodeKind::Expr, None, vec![e])),
        Just(n(NodeKind::Pass, None, vec![])),
        Just(n(NodeKind::Comment, Some("# note"), vec![])),
    ]
}

fn block() -> impl Strategy<Value = NestedNode> {
    proptest::collection::vec(simple_stmt(), 0..=3).prop_map(|xs| n(NodeKind::Block, None, xs))
}

fn stmt() -> impl Strategy<Value = NestedNode> {
    prop_oneof![
        3 => simple_stmt(),
        1 => (expr(), block(), proptest::option::of(block())).prop_map(|(c, then, orelse)| {
            let mut children = vec![c, then];
            children.extend(orelse);
            n(NodeKind::If, None, children)
        }),
        1 => (expr(), block()).prop_map(|(c, body)| n(NodeKind::While, None, vec![c, body])),
    ]
}

fn program() -> impl Strategy<Value = NestedNode> {
    proptest::collection::vec(stmt(), 0..=5).prop_map(|xs| n(NodeKind::Module, None, xs))
}

fn rename(node: &NestedNode, rules: &RuleSet) -> NestedNode {
    let value = match (&node.value, node.kind) {
        (Some(v), NodeKind::Name | NodeKind::FunctionDef) if !rules.is_builtin(v) => {
            Some(format!("renamed_{v}"))
        }
        (v, _) => v.clone(),
    };
    NestedNode {
        kind: node.kind,
        value,
        children: node
            .children
            .iter()
            .filter(|c| c.kind != NodeKind::Comment)
            .map(|c| rename(c, rules))
            .collect(),
    }
}

fn builder() -> Canonicalizer {
    Canonicalizer::new(Arc::new(RuleSet::python_v1()))
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        failure_persistence: None,
        ..ProptestConfig::default()
    })]

    #[test]
    fn generated_programs_are_well_formed(p in program()) {
        prop_assert!(SyntaxTree::from_nested(&p).validate().is_ok());
    }

    #[test]
    fn renaming_and_comments_do_not_change_the_state(p in program()) {
        let b = builder();
        let original = b.canonicalize_lenient(&SyntaxTree::from_nested(&p)).unwrap();
        let renamed = b
            .canonicalize_lenient(&SyntaxTree::from_nested(&rename(&p, b.rule_set())))
            .unwrap();
        prop_assert_eq!(&original, &renamed);
        prop_assert_eq!(original.fingerprint(), renamed.fingerprint());
    }

    #[test]
    fn canonicalization_is_idempotent(p in program()) {
        let b = builder();
        let once = b.canonicalize_lenient(&SyntaxTree::from_nested(&p)).unwrap();
        if !once.is_approximate() {
            let twice = b.canonicalize(once.tree()).unwrap();
            prop_assert_eq!(once, twice);
        }
    }

    #[test]
    fn diff_then_apply_reaches_the_target(a in program(), b in program()) {
        let script = diff_nested(&a, &b);
        prop_assert_eq!(script.apply(&a).unwrap(), b);
    }

    #[test]
    fn edit_distance_is_bounded_by_signatures_and_scripts(a in program(), b in program()) {
        let (ta, tb) = (SyntaxTree::from_nested(&a), SyntaxTree::from_nested(&b));
        let cost = CostModel::default();
        let d = tree_edit_distance(&ta, &tb, &cost);
        prop_assert_eq!(tree_edit_distance(&ta, &ta, &cost), 0);
        prop_assert_eq!(d, tree_edit_distance(&tb, &ta, &cost));
        prop_assert!(ShapeSignature::of(&ta).lower_bound(&ShapeSignature::of(&tb), &cost) <= d);
        prop_assert!(diff(&ta, &tb).cost(&cost) >= d);
    }
}
