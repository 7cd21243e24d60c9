use clap::{Arg, Command};
use glam::DVec3;
use tracing::{error, info};

use steersim::logging::{self, LogConfig, LogOutput};
use steersim::models::{NeighborhoodConfig, Pursuit, Radar, SteeringBehavior, Vehicle, Wander};
use steersim::scenario::ScenarioConfig;
use steersim::simulation::{Agent, SimulationEngine, SimulationError};

fn main() {
    // コマンドライン引数の解析
    let matches = Command::new("steersim")
        .version(env!("CARGO_PKG_VERSION"))
        .about("操舵シミュレーション (Steering Simulation)")
        .long_about(
            "自律エージェントの操舵シミュレーションシステム\n\
             固定時間刻みで群れ・追跡・経路追従・障害物回避などの操舵行動を再現します。",
        )
        .arg(
            Arg::new("scenario")
                .short('s')
                .long("scenario")
                .value_name("FILE")
                .help("シナリオファイル(.yaml)のパスを指定")
                .long_help(
                    "実行するシナリオファイル(.yaml)のパスを指定します。\n\
                     指定しない場合、使用方法を表示します。",
                ),
        )
        .arg(
            Arg::new("info")
                .short('i')
                .long("info")
                .action(clap::ArgAction::SetTrue)
                .help("シナリオの情報のみ表示して終了")
                .conflicts_with("test"),
        )
        .arg(
            Arg::new("test")
                .short('t')
                .long("test")
                .action(clap::ArgAction::SetTrue)
                .help("組み込みのデモシナリオを実行")
                .conflicts_with("info"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(clap::ArgAction::Count)
                .help("詳細出力レベル (-v: 基本, -vv: 詳細, -vvv: デバッグ)"),
        )
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_name("LEVEL")
                .help("ログレベル (trace, debug, info, warn, error)"),
        )
        .arg(
            Arg::new("log-output")
                .long("log-output")
                .value_name("OUTPUT")
                .default_value("console")
                .help("ログ出力先 (console, file, both)"),
        )
        .arg(
            Arg::new("log-dir")
                .long("log-dir")
                .value_name("DIR")
                .default_value("logs")
                .help("ログファイルの出力ディレクトリ"),
        )
        .get_matches();

    let verbose_level = matches.get_count("verbose");

    // ログ設定
    let output = match matches
        .get_one::<String>("log-output")
        .map(|s| s.parse::<LogOutput>())
        .unwrap_or(Ok(LogOutput::Console))
    {
        Ok(output) => output,
        Err(e) => {
            eprintln!("エラー: {}", e);
            std::process::exit(2);
        }
    };
    let level = matches
        .get_one::<String>("log-level")
        .map(|s| logging::parse_log_level(s))
        .unwrap_or_else(|| logging::level_from_verbosity(verbose_level));
    let log_config = LogConfig {
        level,
        output,
        log_dir: matches
            .get_one::<String>("log-dir")
            .cloned()
            .unwrap_or_else(|| "logs".to_string()),
        ..LogConfig::default()
    };
    let _guard = match logging::init_logging(log_config) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("ログ初期化エラー: {}", e);
            std::process::exit(1);
        }
    };

    println!("操舵シミュレーション (Steering Simulation) - steersim v{}", env!("CARGO_PKG_VERSION"));
    println!();

    if verbose_level > 0 {
        println!("詳細出力レベル: {}", verbose_level);
    }

    // デモモードの実行
    if matches.get_flag("test") {
        println!("=== デモシナリオ ===");
        if let Err(e) = run_demo(verbose_level) {
            error!("デモ実行エラー: {}", e);
            std::process::exit(1);
        }
        return;
    }

    // シナリオファイルの処理
    if let Some(scenario_path) = matches.get_one::<String>("scenario") {
        match run_scenario(scenario_path, matches.get_flag("info"), verbose_level) {
            Ok(_) => {
                if verbose_level > 0 {
                    println!("シナリオ実行が正常に完了しました。");
                }
            }
            Err(e) => {
                eprintln!("エラー: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        show_default_help();
    }
}

/// 組み込みデモ: 群れ3台と追跡者1台
fn run_demo(verbose_level: u8) -> Result<(), SimulationError> {
    let mut engine = SimulationEngine::new(0.05, 20.0, 42);
    engine.verbose_level = verbose_level;

    let flock_positions = [
        DVec3::new(0.0, 0.0, 0.0),
        DVec3::new(1.5, 0.0, 0.5),
        DVec3::new(-1.0, 0.0, 1.0),
    ];
    let mut leader = None;
    for (i, position) in flock_positions.iter().enumerate() {
        let id = engine.allocate_id();
        let mut vehicle = Vehicle::new(id, format!("boid{}", i + 1), *position, DVec3::Z);
        vehicle.set_max_speed(2.0);
        vehicle.set_max_force(1.0);
        let agent = Agent::new(vehicle)
            .with_radar(Radar::new(id))
            .with_neighborhood(NeighborhoodConfig::new(3.0, 7.5, 135.0))
            .with_steering(SteeringBehavior::Separation, 1.5)
            .with_steering(SteeringBehavior::Alignment, 0.5)
            .with_steering(SteeringBehavior::Cohesion, 0.5)
            .with_steering(SteeringBehavior::Wander(Wander::default()), 0.3);
        engine.add_vehicle(agent)?;
        leader.get_or_insert(id);
        println!("ビークルが作成されました: boid{} ({})", i + 1, id);
    }

    if let Some(quarry) = leader {
        let id = engine.allocate_id();
        let mut wolf = Vehicle::new(id, "wolf".to_string(), DVec3::new(0.0, 0.0, -10.0), DVec3::Z);
        wolf.set_max_speed(2.5);
        wolf.set_max_force(1.5);
        wolf.spawn_time = 2.0;
        engine.add_vehicle(Agent::new(wolf).with_steering(SteeringBehavior::Pursuit(Pursuit::new(quarry)), 1.0))?;
        println!("追跡者が作成されました: wolf ({}) → {}", id, quarry);
    }

    let summary = engine.run();
    println!();
    summary.print();
    Ok(())
}

/// シナリオファイルを読み込んで実行
fn run_scenario(scenario_path: &str, info_only: bool, verbose_level: u8) -> Result<(), Box<dyn std::error::Error>> {
    // シナリオファイルの読み込み
    let scenario = ScenarioConfig::from_file(scenario_path)?;

    if verbose_level > 0 {
        info!("シナリオファイル読み込み完了: {}", scenario_path);
    }

    // 情報表示のみの場合
    if info_only {
        scenario.print_summary();
        return Ok(());
    }

    execute_scenario(scenario, verbose_level)?;

    Ok(())
}

/// シナリオの実行
fn execute_scenario(scenario: ScenarioConfig, verbose_level: u8) -> Result<(), Box<dyn std::error::Error>> {
    scenario.print_summary();
    println!();

    let mut simulation = SimulationEngine::from_scenario(&scenario, verbose_level)?;
    let summary = simulation.run();

    println!();
    summary.print();

    Ok(())
}

/// デフォルトヘルプとシナリオ一覧を表示
fn show_default_help() {
    println!("使用方法:");
    println!("  steersim [オプション]");
    println!();
    println!("オプション:");
    println!("  -s, --scenario <FILE>   シナリオファイルを指定して実行");
    println!("  -i, --info              シナリオ情報のみ表示");
    println!("  -t, --test              組み込みデモシナリオを実行");
    println!("  -v, --verbose           詳細出力 (複数指定で詳細レベル上昇)");
    println!("      --log-level <LEVEL> ログレベル");
    println!("      --log-output <OUT>  ログ出力先 (console, file, both)");
    println!("      --log-dir <DIR>     ログディレクトリ");
    println!("  -h, --help              このヘルプを表示");
    println!();
    println!("利用可能なシナリオファイル:");
    println!("  scenarios/flocking.yaml        - 群れ行動");
    println!("  scenarios/pursuit_evasion.yaml - 追跡と逃走・障害物回避");
    println!("  scenarios/path_following.yaml  - 経路追従");
    println!();
    println!("例:");
    println!("  steersim -s scenarios/flocking.yaml");
    println!("  steersim -s scenarios/pursuit_evasion.yaml -v");
    println!("  steersim -s scenarios/path_following.yaml -i");
    println!("  steersim --test");
}
