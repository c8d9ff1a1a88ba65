/// Render integration tests: end-to-end source-to-text rendering.
use forktext::core::pipeline::Pipeline;
use forktext::{render, render_sandboxed, IncludeError, RenderError, RenderSettings, WarningKind};
use proptest::prelude::*;
use std::collections::HashSet;

fn render_seeded(source: &str, seed: u64) -> String {
    render(source, &RenderSettings::default().with_seed(seed)).unwrap()
}

fn fixtures() -> Pipeline {
    Pipeline::builder()
        .working_directory("tests/fixtures")
        .build()
        .unwrap()
}

#[test]
fn copy_reference_always_matches() {
    for seed in 0..100 {
        let text = render_seeded("{Name: (Alice), (Bob)} {@Name}", seed);
        assert!(text == "Alice Alice\n" || text == "Bob Bob\n", "{text:?}");
    }
}

#[test]
fn silent_fork_is_only_visible_through_references() {
    let mut seen = HashSet::new();
    for seed in 0..100 {
        let text = render_seeded("silent {#Name: (Alice), (Bob)} then referenced {@Name}", seed);
        assert!(
            text == "Silent then referenced Alice\n" || text == "Silent then referenced Bob\n",
            "{text:?}"
        );
        seen.insert(text);
    }
    assert_eq!(seen.len(), 2);
}

#[test]
fn mapped_reference_agrees_with_fork() {
    let source = "{Name: (Alice), (Bob)} waved. {@Name: 0 -> (She), 1 -> (He)} smiled.";
    for seed in 0..100 {
        let text = render_seeded(source, seed);
        assert!(
            text == "Alice waved. She smiled.\n" || text == "Bob waved. He smiled.\n",
            "{text:?}"
        );
    }
}

#[test]
fn unused_fallback_never_renders() {
    let source = "{Name: (Alice), (Bob)} ... {@Name: 0 -> (She), 1 -> (He), (unused fallback)}";
    for seed in 0..50 {
        assert!(!render_seeded(source, seed).contains("unused"));
    }
}

#[test]
fn weights_bias_the_draw() {
    let heavy = (0..1000)
        .filter(|&seed| render_seeded("{(a) 90, (b) 10}", seed) == "A\n")
        .count();
    assert!(heavy > 800, "heavy branch drawn {heavy} times");
    assert!(heavy < 980, "light branch drawn {} times", 1000 - heavy);
}

#[test]
fn set_fork_draws_without_replacement() {
    let source = "{|Deck: (x), (y), (z)} {eval @Deck} {eval @Deck}";
    for seed in 0..50 {
        let text = render_seeded(source, seed).to_lowercase();
        let mut cards: Vec<&str> = text.split_whitespace().collect();
        cards.sort_unstable();
        assert_eq!(cards, vec!["x", "y", "z"], "seed {seed}");
    }
}

#[test]
fn include_shares_forks_and_functions() {
    let source = std::fs::read_to_string("tests/fixtures/story.txt").unwrap();
    let pipeline = fixtures();
    let output = pipeline.render(&source).unwrap();
    assert!(
        output.text == "Alice said \"well met\" and she left.\n"
            || output.text == "Bob said \"well met\" and he left.\n",
        "{:?}",
        output.text
    );
    assert!(output.warnings.is_empty(), "{:?}", output.warnings);
}

#[test]
fn include_does_not_disturb_the_includer_sequence() {
    let with_include = "{# [include(\"characters.txt\")]}{(a), (b), (c), (d)} {(e), (f), (g)}";
    let without = "{# [1]}{(a), (b), (c), (d)} {(e), (f), (g)}";
    for seed in 0..30 {
        let pipeline = Pipeline::builder()
            .seed(seed)
            .working_directory("tests/fixtures")
            .build()
            .unwrap();
        assert_eq!(
            pipeline.render(with_include).unwrap().text,
            pipeline.render(without).unwrap().text,
            "seed {seed}"
        );
    }
}

#[test]
fn missing_include_is_an_error() {
    let err = fixtures()
        .render("{[include(\"nowhere.txt\")]}")
        .unwrap_err();
    assert!(
        matches!(err, RenderError::Include(IncludeError::NotFound(_))),
        "{err:?}"
    );
}

#[test]
fn sandboxed_render_refuses_includes() {
    let settings = RenderSettings::default()
        .with_seed(1)
        .with_working_directory("tests/fixtures");
    let err = render_sandboxed("{[include(\"characters.txt\")]}", &settings).unwrap_err();
    assert!(
        matches!(err, RenderError::Include(IncludeError::NoFilesystem)),
        "{err:?}"
    );
    assert_eq!(render_sandboxed("{(only)}", &settings).unwrap(), "Only\n");
}

#[test]
fn settings_file_configures_the_pipeline() {
    let pipeline = Pipeline::builder()
        .settings_file("tests/fixtures/settings.ron")
        .build()
        .unwrap();
    assert_eq!(pipeline.settings().random_seed, Some(42));
    // Article correction is switched off by the file.
    assert_eq!(pipeline.render("a apple").unwrap().text, "A apple\n");
    assert_eq!(
        pipeline.render("{(a), (b), (c)}").unwrap(),
        pipeline.render("{(a), (b), (c)}").unwrap()
    );
}

#[test]
fn unresolved_reference_warns_and_continues() {
    let output = fixtures().render("Hello {@Stranger}!").unwrap();
    assert_eq!(output.text, "Hello!\n");
    assert_eq!(output.warnings.len(), 1);
    assert_eq!(output.warnings[0].kind, WarningKind::UnresolvedReference);
}

#[test]
fn version_mismatch_is_a_warning() {
    let output = fixtures()
        .render("{# [provide(#{ settings: #{ version: \"0.9\" } })]}text")
        .unwrap();
    assert_eq!(output.text, "Text\n");
    assert!(output
        .warnings
        .iter()
        .any(|w| w.kind == WarningKind::VersionMismatch));
}

#[test]
fn re_executing_unknown_identifier_fails() {
    let err = render("{eval @Nobody}", &RenderSettings::default().with_seed(1)).unwrap_err();
    assert!(matches!(err, RenderError::UnknownIdentifier { .. }), "{err:?}");
}

#[test]
fn duplicate_identifier_fails() {
    let err = render(
        "{Name: (a)} {Name: (b)}",
        &RenderSettings::default().with_seed(1),
    )
    .unwrap_err();
    assert!(matches!(err, RenderError::DuplicateIdentifier { .. }), "{err:?}");
}

#[test]
fn calling_unprovided_function_fails() {
    let err = render("{call missing}", &RenderSettings::default().with_seed(1)).unwrap_err();
    assert!(matches!(err, RenderError::FunctionNotFound { .. }), "{err:?}");
}

proptest! {
    #[test]
    fn same_seed_same_text(seed in any::<u64>()) {
        let source = std::fs::read_to_string("tests/fixtures/menu.txt").unwrap();
        prop_assert_eq!(render_seeded(&source, seed), render_seeded(&source, seed));
    }

    #[test]
    fn menu_always_renders_a_full_sentence(seed in any::<u64>()) {
        let source = std::fs::read_to_string("tests/fixtures/menu.txt").unwrap();
        let text = render_seeded(&source, seed);
        prop_assert!(text.starts_with("Today's special is "), "{:?}", text);
        prop_assert!(text.ends_with(".\n"), "{:?}", text);
    }
}
