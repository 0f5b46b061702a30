use adaptive_weights::{
    load_layered, replay_evaluator, Coordinator, IndicatorSnapshot, Indicators, Layer, ParamGrid,
    ReplayStep, WeightOptimizer,
};
use anyhow::Result;
use std::collections::BTreeMap;
use tracing::{info, Level};
use tracing_subscriber::fmt;

fn main() -> Result<()> {
    // Initialize logging
    fmt().with_max_level(Level::INFO).init();

    // File is optional, ADAPTIVE__* variables override it
    let path = std::env::var("ADAPTIVE_CONFIG").unwrap_or_else(|_| "adaptive.toml".to_string());
    let config = load_layered(&path)?;
    let coordinator = Coordinator::new(config)?;

    info!("Adaptive Weight Engine Example");
    info!("==============================");

    // Example 1: Registration
    info!("\n=== Example 1: Participants ===");
    for (name, layer) in [
        ("technical_analyst", "analyst"),
        ("news_analyst", "analyst"),
        ("bull_researcher", "researcher"),
        ("risk_debator", "debator"),
        ("desk", "trader"),
        ("portfolio_manager", "manager"),
    ] {
        let layer = coordinator.register(name, layer);
        info!("  {} -> {}", name, layer);
    }

    // Example 2: Classification
    info!("\n=== Example 2: Market Regime ===");
    let snapshot = IndicatorSnapshot::new("BTC-USD", 100.0)
        .with_price_change(0.035)
        .with_indicators(Indicators {
            rsi: Some(64.0),
            macd: Some(1.2),
            macd_signal: Some(0.8),
            sma_20: Some(97.0),
            sma_50: Some(95.0),
            sma_200: Some(90.0),
            ema_5: Some(99.0),
            ema_10: Some(98.0),
            ema_20: Some(97.5),
            ema_50: Some(95.5),
            ema_200: Some(90.5),
            atr: Some(1.1),
            volume: Some(1800.0),
            volume_ma_20: Some(1000.0),
            ..Default::default()
        })
        .with_key_levels(vec![92.0, 110.0]);
    let regime = coordinator.classify(&snapshot);
    info!("  {}", regime.summary);
    for signal in &regime.signals {
        info!("  signal: {}", signal);
    }

    // Example 3: Learning from outcomes
    info!("\n=== Example 3: Outcomes ===");
    let history = [
        ("technical_analyst", 1.02, 1.00),
        ("news_analyst", 1.30, 1.00),
        ("bull_researcher", 0.95, 1.00),
        ("desk", 0.40, 1.00),
    ];
    for _ in 0..5 {
        for (name, prediction, actual) in history {
            coordinator.record_prediction(name, prediction)?;
            coordinator.record_actual(name, actual)?;
        }
    }
    for (name, weight) in coordinator.update_all_weights(Some(&regime), None)? {
        info!("  {:<18} {:.3}", name, weight);
    }

    // Example 4: Full pipeline
    info!("\n=== Example 4: Analyze and Adjust ===");
    let predictions: BTreeMap<String, f64> = [
        ("technical_analyst", 0.6),
        ("news_analyst", -0.2),
        ("bull_researcher", 0.4),
        ("desk", 0.1),
    ]
    .into_iter()
    .map(|(name, value)| (name.to_string(), value))
    .collect();
    let report = coordinator.analyze_and_adjust(&snapshot, &predictions)?;
    info!("  {}", report.summary);
    println!("{}", serde_json::to_string_pretty(&report)?);

    // Example 5: Parameter search over a replay
    info!("\n=== Example 5: Tuning ===");
    let steps: Vec<ReplayStep> = (0..30)
        .map(|i| {
            let actual = 1.0 + (i % 5) as f64 * 0.1;
            ReplayStep {
                predictions: [
                    ("sharp".to_string(), actual * 1.01),
                    ("noisy".to_string(), actual * 1.6),
                ]
                .into_iter()
                .collect(),
                actual,
            }
        })
        .collect();
    let evaluate = replay_evaluator(Layer::Analyst, &steps);
    let result = WeightOptimizer::default().grid_search(evaluate, &ParamGrid::default())?;
    info!(
        "  best speed {:.2}, window {}, bounds [{:.2}, {:.2}], score {:.4}",
        result.best_params.adjust_speed,
        result.best_params.error_window_size,
        result.best_params.min_weight,
        result.best_params.max_weight,
        result.best_score
    );

    info!("\nLayer fallbacks: {}", coordinator.layer_fallbacks());
    Ok(())
}
