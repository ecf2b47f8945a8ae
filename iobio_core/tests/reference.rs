//! Randomized comparison of [`Tree`] against a straightforward recursive
//! implementation working directly on nested [`Value`]s.
//!
//! For every generated delta both sides must agree on whether it applies,
//! and after every step the tree snapshot must equal the reference value.
//! The live node count is checked too, so freed subtrees cannot leak.

use iobio_core::{Action, Delta, Tree, Value};
use rand::{Rng, SeedableRng, rngs::StdRng};

const KEYS: &[&str] = &["a", "b", "c", "viewers"];

fn reference_apply(root: &mut Value, path: &[String], action: &Action) -> Result<(), ()> {
    match path {
        [] => match action {
            Action::Update(value) => {
                *root = value.clone();
                Ok(())
            }
            _ => Err(()),
        },
        [key] => {
            let Value::Map(map) = root else {
                return Err(());
            };
            match action {
                Action::Update(value) | Action::Add(value) => {
                    map.insert(key.clone(), value.clone());
                    Ok(())
                }
                Action::Append(value) => match map.get_mut(key) {
                    Some(Value::Array(items)) => {
                        items.push(value.clone());
                        Ok(())
                    }
                    _ => Err(()),
                },
                Action::Delete => {
                    map.remove(key);
                    Ok(())
                }
            }
        }
        [head, rest @ ..] => {
            let Value::Map(map) = root else {
                return Err(());
            };
            if !map.contains_key(head) {
                if !action.creates_ancestors() {
                    return Err(());
                }
                map.insert(head.clone(), Value::empty_map());
            }
            match map.get_mut(head) {
                Some(child) => reference_apply(child, rest, action),
                None => Err(()),
            }
        }
    }
}

fn node_count(value: &Value) -> usize {
    match value {
        Value::Map(map) => 1 + map.values().map(node_count).sum::<usize>(),
        _ => 1,
    }
}

fn random_value(rng: &mut StdRng, depth: u32) -> Value {
    let choice = if depth == 0 {
        rng.random_range(0..4)
    } else {
        rng.random_range(0..6)
    };
    match choice {
        0 => Value::Null,
        1 => Value::Bool(rng.random_bool(0.5)),
        2 => Value::Integer(rng.random_range(-100..100)),
        3 => Value::Text(format!("user{}", rng.random_range(0..10))),
        4 => Value::Array(
            (0..rng.random_range(0..3))
                .map(|_| random_value(rng, depth - 1))
                .collect(),
        ),
        _ => Value::map(
            (0..rng.random_range(0..3))
                .map(|_| (KEYS[rng.random_range(0..KEYS.len())], random_value(rng, depth - 1)))
                .collect::<Vec<_>>(),
        ),
    }
}

fn random_delta(rng: &mut StdRng) -> Delta {
    let len = match rng.random_range(0..20) {
        0 => 0,
        n => 1 + n % 3,
    };
    let path: Vec<String> = (0..len)
        .map(|_| KEYS[rng.random_range(0..KEYS.len())].to_owned())
        .collect();
    let action = match rng.random_range(0..4) {
        0 => Action::Update(random_value(rng, 2)),
        1 => Action::Add(random_value(rng, 2)),
        2 => Action::Append(random_value(rng, 0)),
        _ => Action::Delete,
    };
    Delta { path, action }
}

#[test]
fn tree_matches_recursive_reference() {
    for seed in 0..200u64 {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut tree = Tree::new();
        let mut reference = Value::empty_map();

        for step in 0..200 {
            let delta = random_delta(&mut rng);
            let expected = reference_apply(&mut reference, &delta.path, &delta.action);
            let actual = tree.apply(delta.clone());

            assert_eq!(
                expected.is_ok(),
                actual.is_ok(),
                "seed {seed} step {step}: {delta:?} -> {actual:?}"
            );
            assert_eq!(
                tree.snapshot(),
                reference,
                "seed {seed} step {step}: {delta:?}"
            );
            assert_eq!(tree.len(), node_count(&reference), "seed {seed} step {step}");
        }
    }
}

#[test]
fn well_formed_sequence_builds_expected_tree() {
    let mut tree = Tree::new();
    let deltas = vec![
        Delta::replace_root(Value::map([("files", Value::empty_map())])),
        Delta::add(
            ["files", "docs", "a.txt"],
            Value::map([("size", Value::from(3)), ("viewers", Value::Array(vec![]))]),
        ),
        Delta::append(["files", "docs", "a.txt", "viewers"], "user7"),
        Delta::update(["files", "docs", "a.txt", "size"], 4),
        Delta::add(["files", "b.txt"], Value::map([("size", Value::from(1))])),
        Delta::delete(["files", "b.txt"]),
    ];
    for delta in deltas {
        tree.apply(delta).unwrap();
    }

    let expected = Value::map([(
        "files",
        Value::map([(
            "docs",
            Value::map([(
                "a.txt",
                Value::map([
                    ("size", Value::from(4)),
                    ("viewers", Value::Array(vec![Value::from("user7")])),
                ]),
            )]),
        )]),
    )]);
    assert_eq!(tree.snapshot(), expected);
}
