use pdf_translate::config::{validate_page_range, Config, ToolOverrides};

#[test]
fn parse_example_config() {
    let raw = include_str!("../pdf-translate.example.toml");
    let cfg: Config = toml::from_str(raw).expect("parse TOML");
    assert_eq!(cfg.tool.executable, "pdf2zh");
    assert_eq!(cfg.tool.threads, 4);
    assert!(cfg.probe.timeout_ms > 0);
    assert_eq!(cfg.translate.max_concurrent, 2);
}

#[test]
fn partial_config_keeps_defaults() {
    let cfg: Config = toml::from_str(
        r#"
        [tool]
        target_language = "ja"

        [tool.secrets]
        DEEPL_AUTH_KEY = "k"
        "#,
    )
    .expect("parse TOML");
    assert_eq!(cfg.tool.target_language, "ja");
    assert_eq!(cfg.tool.source_language, "en");
    assert_eq!(cfg.tool.service, "bing");
    assert_eq!(cfg.tool.secrets.get("DEEPL_AUTH_KEY").map(String::as_str), Some("k"));
    assert_eq!(cfg.bootstrap.python_version, "3.12");
}

#[test]
fn overrides_apply_on_top_of_persisted_defaults() {
    let cfg = Config::default();
    let overrides = ToolOverrides {
        service: Some("google".into()),
        threads: Some(0),
        page_range: Some(" 1-3,5 ".into()),
        ..Default::default()
    };
    let tool = cfg.tool_config(&overrides).unwrap();
    assert_eq!(tool.service, "google");
    assert_eq!(tool.threads, 0);
    assert_eq!(tool.page_range, "1-3,5");
    assert_eq!(tool.target_language, "zh");

    // the persisted defaults are untouched
    assert_eq!(cfg.tool.service, "bing");
}

#[test]
fn bad_page_range_is_rejected_before_building_config() {
    let overrides = ToolOverrides {
        page_range: Some("1-".into()),
        ..Default::default()
    };
    assert!(Config::default().tool_config(&overrides).is_err());
}

#[test]
fn page_range_grammar() {
    for ok in ["", "  ", "1", "1-3", "1-3,5", "2,4,6-8", " 10-12 "] {
        assert!(validate_page_range(ok).is_ok(), "{ok:?} should be accepted");
    }
    for bad in ["a", "1-", "-3", "1,,2", "1-3,", "1 - 3", "1;2", "1-2-3"] {
        assert!(validate_page_range(bad).is_err(), "{bad:?} should be rejected");
    }
}

#[test]
fn secrets_are_not_serialized() {
    let mut cfg = Config::default();
    cfg.tool
        .secrets
        .insert("OPENAI_API_KEY".into(), "sk-secret".into());
    let raw = toml::to_string(&cfg).unwrap();
    assert!(!raw.contains("sk-secret"));
}
