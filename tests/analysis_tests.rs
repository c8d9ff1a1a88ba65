/// Analysis integration tests: outcome counts and their agreement with rendering.
use forktext::{analyze, render, RenderSettings};
use num_bigint::BigUint;
use std::collections::HashSet;

fn count(source: &str) -> BigUint {
    analyze(source).unwrap().possible_outcomes
}

fn distinct_renders(source: &str, seeds: u64) -> usize {
    (0..seeds)
        .map(|seed| render(source, &RenderSettings::default().with_seed(seed)).unwrap())
        .collect::<HashSet<_>>()
        .len()
}

#[test]
fn documented_counts() {
    assert_eq!(count(""), BigUint::from(1u32));
    assert_eq!(count("test"), BigUint::from(1u32));
    assert_eq!(count("test {(a), (b)}"), BigUint::from(2u32));
    assert_eq!(count("test {(a), (b)} {(1), (2), (3)}"), BigUint::from(6u32));
    assert_eq!(count("test {(a), (b), {(c), (d), (e)}}"), BigUint::from(5u32));
}

#[test]
fn menu_fixture_count() {
    let source = std::fs::read_to_string("tests/fixtures/menu.txt").unwrap();
    let analysis = analyze(&source).unwrap();
    // Dish: 3 branches + 1 from the stew mapping; times 2 sides.
    assert_eq!(analysis.possible_outcomes, BigUint::from(8u32));
    assert_eq!(analysis.forks, 3);
    assert_eq!(analysis.references, 1);
    assert!(analysis.unresolved.is_empty());
}

#[test]
fn story_fixture_lists_included_names_as_unresolved() {
    let source = std::fs::read_to_string("tests/fixtures/story.txt").unwrap();
    let analysis = analyze(&source).unwrap();
    assert_eq!(analysis.possible_outcomes, BigUint::from(1u32));
    assert_eq!(analysis.unresolved, vec!["Hero".to_string()]);
}

#[test]
fn renders_never_exceed_the_count() {
    let documents = [
        "{(a), (b)} {(c), (d), (e)}",
        "{N: (a), (b)} {@N: 0 -> ({(x), (y)}), 1 -> (z)} {(p), (q)}",
        "{N: (a), (b), (c)} {@N: 0 -> (z), ({(x), (y)})}",
        "{N: (a), (b)} {eval @N}",
        "{(one {(1), (2)}), (two)} and {@Missing}",
        "{({X: (a), (b)}), ({X: (c), (d)})} {@X: 0 -> ({(1), (2)}), (z)}",
        "{({X: (a), (b)}), ({X: (c)})} {eval @X}",
    ];
    for source in documents {
        let bound = count(source);
        let seen = BigUint::from(distinct_renders(source, 400));
        assert!(seen <= bound, "{source}: saw {seen} renderings, analysis says {bound}");
    }
}

#[test]
fn menu_renders_reach_every_outcome() {
    let source = std::fs::read_to_string("tests/fixtures/menu.txt").unwrap();
    assert_eq!(BigUint::from(distinct_renders(&source, 500)), count(&source));
}

#[test]
fn syntax_errors_carry_line_and_column() {
    let source = "fine\nstill fine {@Name: 0 -> (a), 0 -> (b)}";
    let err = analyze(source).unwrap_err();
    assert_eq!(err.line_column(source).0, 2);
}
