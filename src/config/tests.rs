use super::*;

#[test]
fn defaults_match_display_profile() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.server.addr.port(), DEFAULT_PORT);
    assert_eq!(
        settings.raster.viewport,
        Viewport {
            width: 800,
            height: 480
        }
    );
    assert_eq!(settings.raster.timeout, Duration::from_secs(15));
    assert_eq!(settings.encode.format, ArtifactFormat::Png);
    assert_eq!(settings.encode.dither, "FloydSteinberg");
    assert_eq!(settings.encode.remap, "pattern:gray50");
    assert_eq!(settings.encode.depth.get(), 1);
    assert_eq!(settings.output.base_name, "output");
    assert_eq!(settings.pipeline.lock_scope, LockScope::PerKey);
    assert!(settings.template.allow_inline);
}

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.server.port = Some(4000);
    raw.logging.level = Some("info".to_string());
    raw.raster.browser_path = Some(PathBuf::from("/usr/bin/chromium"));

    let global = GlobalOverrides {
        browser_path: Some(PathBuf::from("/opt/chrome/chrome")),
        log_level: Some("debug".to_string()),
        ..Default::default()
    };
    let serve = ServeOverrides {
        server_port: Some(4321),
        ..Default::default()
    };

    raw.apply_global_overrides(&global);
    raw.apply_serve_overrides(&serve);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.server.addr.port(), 4321);
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
    assert_eq!(
        settings.raster.browser_path,
        PathBuf::from("/opt/chrome/chrome")
    );
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    raw.apply_global_overrides(&GlobalOverrides {
        log_json: Some(true),
        ..Default::default()
    });
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn lock_scope_accepts_both_designs() {
    assert_eq!("per_key".parse::<LockScope>(), Ok(LockScope::PerKey));
    assert_eq!("per-key".parse::<LockScope>(), Ok(LockScope::PerKey));
    assert_eq!("GLOBAL".parse::<LockScope>(), Ok(LockScope::Global));

    let mut raw = RawSettings::default();
    raw.pipeline.lock_scope = Some("sharded".to_string());
    let err = Settings::from_raw(raw).expect_err("unknown scope rejected");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "pipeline.lock_scope",
            ..
        }
    ));
}

#[test]
fn rejects_zero_deadline_and_viewport() {
    let mut raw = RawSettings::default();
    raw.raster.timeout_seconds = Some(0);
    assert!(Settings::from_raw(raw).is_err());

    let mut raw = RawSettings::default();
    raw.raster.width = Some(0);
    assert!(Settings::from_raw(raw).is_err());
}

#[test]
fn rejects_base_name_with_separators() {
    let mut raw = RawSettings::default();
    raw.output.base_name = Some("../escape".to_string());
    let err = Settings::from_raw(raw).expect_err("base name rejected");
    assert!(matches!(
        err,
        LoadError::Invalid {
            key: "output.base_name",
            ..
        }
    ));
}

#[test]
fn bmp_format_can_be_selected() {
    let mut raw = RawSettings::default();
    raw.apply_global_overrides(&GlobalOverrides {
        encode_format: Some("bmp".to_string()),
        ..Default::default()
    });
    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.encode.format, ArtifactFormat::Bmp);
}

#[test]
fn default_to_serve_command() {
    let args = CliArgs::parse_from(["rasterslot"]);
    let command = args
        .command
        .unwrap_or(Command::Serve(Box::<ServeArgs>::default()));
    assert!(matches!(command, Command::Serve(_)));
}

#[test]
fn parse_serve_overrides() {
    let args = CliArgs::parse_from([
        "rasterslot",
        "serve",
        "--server-host",
        "0.0.0.0",
        "--server-port",
        "9090",
        "--pipeline-lock-scope",
        "global",
    ]);

    assert_eq!(args.global.lock_scope.as_deref(), Some("global"));
    match args.command.expect("serve command") {
        Command::Serve(serve) => {
            assert_eq!(serve.overrides.server_host.as_deref(), Some("0.0.0.0"));
            assert_eq!(serve.overrides.server_port, Some(9090));
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn parse_render_arguments() {
    let args = CliArgs::parse_from([
        "rasterslot",
        "render",
        "--data",
        "/tmp/data.json",
        "--key",
        "hallway",
    ]);

    match args.command.expect("render command") {
        Command::Render(render) => {
            assert_eq!(render.data, std::path::Path::new("/tmp/data.json"));
            assert_eq!(render.key.as_deref(), Some("hallway"));
        }
        _ => panic!("wrong command parsed"),
    }
}
