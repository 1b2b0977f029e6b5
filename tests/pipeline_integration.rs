//! End-to-end pipeline test: gzip quote files through every stage to the
//! trades and daily PnL tables.

use nbbolab::pipeline::{
    list_partitions, partition_path, run_aggregate_stage, run_backtest_stage, run_denoise_stage,
    run_event_stage, run_model_stage, run_winsor_stage, AggregateStageConfig, DenoiseConfig,
    EventBuilderConfig, EventStore, HistogramModel, StrategyConfig, TailSketchConfig, TickStore,
    WinsorMode,
};
use std::io::Write;
use std::path::Path;
use tempfile::TempDir;

fn write_quotes_gz(path: &Path, lines: &[String]) {
    let file = std::fs::File::create(path).unwrap();
    let mut enc = flate2::write::GzEncoder::new(file, flate2::Compression::fast());
    writeln!(enc, "date,time,venue,bid,bid_size,ask,ask_size,cond,seq").unwrap();
    for line in lines {
        writeln!(enc, "{}", line).unwrap();
    }
    enc.finish().unwrap();
}

/// A drifting two-day quote tape with one spike and some rejects mixed in.
fn synthetic_tape() -> Vec<String> {
    let mut lines = Vec::new();
    for (day, base) in [(20200102u32, 100.0f64), (20200103, 101.0)] {
        for i in 0..60u32 {
            let mid = base + 0.01 * (i % 7) as f64 - 0.01 * ((i / 7) % 3) as f64;
            lines.push(format!(
                "{},10:00:{:02}.{:03},P,{:.2},{},{:.2},{},R,{}",
                day,
                i / 4,
                (i % 4) * 250,
                mid - 0.01,
                3 + i % 5,
                mid + 0.01,
                4 + i % 3,
                i
            ));
        }
        // A spike the denoiser must remove.
        lines.push(format!(
            "{},10:00:20.000,P,899.99,5,900.01,5,R,999",
            day
        ));
        // Rejects: off-venue, bad condition, crossed.
        lines.push(format!("{},10:00:21.000,X,{:.2},5,{:.2},5,R,0", day, base, base + 0.02));
        lines.push(format!("{},10:00:22.000,P,{:.2},5,{:.2},5,A,0", day, base, base + 0.02));
        lines.push(format!("{},10:00:23.000,P,{:.2},5,{:.2},5,R,0", day, base + 0.02, base));
    }
    lines
}

#[test]
fn full_pipeline_over_synthetic_tape() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("quotes_2020.csv.gz");
    write_quotes_gz(&input, &synthetic_tape());

    let ticks_dir = dir.path().join("ticks");
    let events_dir = dir.path().join("events");
    let results_dir = dir.path().join("results");
    std::fs::create_dir_all(&results_dir).unwrap();

    // Stage A.
    let agg = run_aggregate_stage(
        &[input],
        &ticks_dir,
        "ticks_raw",
        &AggregateStageConfig::default(),
    )
    .unwrap();
    assert_eq!(agg.years.len(), 1);
    assert!(agg.ticks_written > 100);
    assert_eq!(agg.glitches.grand_total(), 2); // one crossed quote per day

    // Winsor (clip at extreme quantiles changes nothing on a tame tape).
    let winsor = run_winsor_stage(
        &ticks_dir,
        "ticks_raw",
        &ticks_dir,
        "ticks",
        &TailSketchConfig::default(),
        WinsorMode::Clip,
        1,
        10_000,
    )
    .unwrap();
    assert!(!winsor.cutoffs.q_lo.is_nan());
    let raw = TickStore::open_readonly(&partition_path(&ticks_dir, "ticks_raw", 2020)).unwrap();
    let final_store =
        TickStore::open_readonly(&partition_path(&ticks_dir, "ticks", 2020)).unwrap();
    assert_eq!(raw.row_count().unwrap(), final_store.row_count().unwrap());

    // Denoise removes exactly the two spikes.
    let denoise = run_denoise_stage(
        &ticks_dir,
        "ticks",
        &ticks_dir,
        "ticks_clean",
        &DenoiseConfig::default(),
        10_000,
    )
    .unwrap();
    let removed: u64 = denoise
        .report
        .per_day
        .values()
        .map(|c| c.removed_by_delta + c.removed_by_level)
        .sum();
    assert_eq!(removed, 2);
    assert!(!denoise.report.examples.is_empty());

    // Events.
    let events = run_event_stage(
        &ticks_dir,
        "ticks_clean",
        &events_dir,
        "events",
        &EventBuilderConfig::default(),
        10_000,
    )
    .unwrap();
    assert!(events.counters.events_emitted > 50);
    // One pending event dies at each day end.
    assert_eq!(events.counters.events_dropped_boundary, 2);

    // Every stored event honors the labeling invariants.
    let store = EventStore::open_readonly(&partition_path(&events_dir, "events", 2020)).unwrap();
    store
        .for_each_event(|e| {
            assert_eq!((e.ts / 1_000_000_000) as u32, e.day);
            assert!(e.tau_ms > 0);
            assert!((e.mid_next - e.mid).abs() <= 1.0);
            assert!(e.y == -1 || e.y == 0 || e.y == 1);
            assert!((-1.0..=1.0).contains(&e.imbalance));
            Ok(())
        })
        .unwrap();

    // Model.
    let model_path = dir.path().join("model.json");
    let model = run_model_stage(&events_dir, "events", &model_path, "TEST", 1.0).unwrap();
    assert_eq!(model.cells.len(), 270);
    let reloaded = HistogramModel::load(&model_path).unwrap();
    assert_eq!(reloaded.cells, model.cells);

    // Backtest under the legacy policy (zero costs, EE > 0).
    let cfg = StrategyConfig {
        edge_mode: nbbolab::pipeline::EdgeMode::Legacy,
        ..StrategyConfig::default()
    };
    let backtest = run_backtest_stage(&events_dir, "events", &results_dir, &model, cfg).unwrap();
    assert!(backtest.trades_total > 0);

    // Output tables exist with the exact headers.
    let trades = std::fs::read_to_string(results_dir.join("trades_2020.csv")).unwrap();
    assert!(trades.starts_with(
        "ts_in,ts_out,day,mid_in,mid_out,spread_in,direction_score,expected_edge_ret,cost_ret,gross_ret,net_ret,side"
    ));
    let daily = std::fs::read_to_string(results_dir.join("daily_2020.csv")).unwrap();
    assert!(daily.starts_with(
        "day,num_trades,gross_ret_sum,net_ret_sum,gross_ret_mean,net_ret_mean,cumulative_net_ret"
    ));

    // Daily rows strictly increase in day.
    let days: Vec<u32> = daily
        .lines()
        .skip(1)
        .map(|l| l.split(',').next().unwrap().parse().unwrap())
        .collect();
    assert!(days.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn winsor_drop_excludes_tail_rows() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("quotes.csv.gz");

    // A steadily drifting tape: every log return is distinct, so the
    // interior-quantile cutoffs split them cleanly.
    let mut lines = Vec::new();
    for i in 0..40u32 {
        let mid = 100.0 + 0.005 * i as f64;
        lines.push(format!(
            "20200102,10:00:{:02}.000,P,{:.3},5,{:.3},5,R,{}",
            i,
            mid - 0.005,
            mid + 0.005,
            i
        ));
    }
    write_quotes_gz(&input, &lines);

    let ticks_dir = dir.path().join("ticks");
    run_aggregate_stage(
        &[input],
        &ticks_dir,
        "ticks_raw",
        &AggregateStageConfig::default(),
    )
    .unwrap();

    // Aggressive interior quantiles so real rows get dropped.
    let sketch = TailSketchConfig {
        q_lo: 0.10,
        q_hi: 0.90,
        heap_len: 1_000,
    };
    let summary = run_winsor_stage(
        &ticks_dir,
        "ticks_raw",
        &ticks_dir,
        "ticks",
        &sketch,
        WinsorMode::Drop,
        1,
        10_000,
    )
    .unwrap();
    let (_, year_summary) = summary.per_year[0];
    assert!(year_summary.dropped > 0);
    assert_eq!(
        year_summary.rows_out + year_summary.dropped,
        year_summary.rows_in
    );

    let parts = list_partitions(&ticks_dir, "ticks").unwrap();
    let store = TickStore::open_readonly(&parts[0].1).unwrap();
    assert_eq!(store.row_count().unwrap(), year_summary.rows_out);
}
