//! Exercises the `backtest cusum` CLI path: a master CUSUM signal CSV parsed
//! through the real loader, held in a `CusumSignalStore`, and driven through
//! the CUSUM orchestrator against candles in a real (in-memory) sqlite
//! database.

use std::io::Write;

use rust_decimal_macros::dec;

use krw_eth_engine::application::orchestrators::cusum::{CusumFilter, cusum_aggregates, run_cusum_fold};
use krw_eth_engine::domain::candle::Candle;
use krw_eth_engine::domain::cusum::CusumSignalStore;
use krw_eth_engine::domain::repositories::CandleRepository;
use krw_eth_engine::infrastructure::csv_loader::load_cusum_csv;
use krw_eth_engine::infrastructure::persistence::{Database, SqliteCandleRepository};

fn at(day: u32, hour: u32) -> chrono::NaiveDateTime {
    chrono::NaiveDate::from_ymd_opt(2024, 1, day).unwrap().and_hms_opt(hour, 0, 0).unwrap()
}

#[tokio::test]
async fn cusum_orchestrator_runs_end_to_end_against_csv_loaded_signals() {
    let db = Database::new("sqlite::memory:").await.unwrap();
    let candles = SqliteCandleRepository::new(db.pool.clone());

    candles
        .insert_many(&[
            Candle::new("KRW-ETH", at(15, 9), dec!(5000000), dec!(5200000), dec!(4950000), dec!(5100000), 1.0),
            Candle::new("KRW-ETH", at(16, 9), dec!(5000000), dec!(5200000), dec!(4950000), dec!(5100000), 1.0),
        ])
        .await
        .unwrap();

    let mut file = tempfile::NamedTempFile::new().unwrap();
    let header = "signal_time,strategy,model,fold_id,primary_signal,ml_prediction,final_action,confidence,threshold,cusum_selectivity_pct,suggested_weight,entry_price_ref,take_profit_price,stop_loss_price,expiration_time,actual_direction,correct";
    writeln!(file, "{header}").unwrap();
    writeln!(file, "2024-01-15 09:00:00,trend_follow,gru,1,1,1,BUY,0.7,0.5,5.0,0.5,5000000,5150000,4900000,2024-01-20 09:00:00,UP,1").unwrap();
    writeln!(file, "2024-01-16 09:00:00,trend_follow,gru,1,1,1,BUY,0.8,0.5,6.0,0.5,5000000,5150000,4900000,2024-01-21 09:00:00,UP,1").unwrap();
    writeln!(file, "2024-01-15 09:00:00,other_strategy,gru,1,1,1,BUY,0.6,0.5,4.0,0.5,5000000,5150000,4900000,2024-01-20 09:00:00,UP,1").unwrap();
    file.flush().unwrap();

    let signals = load_cusum_csv(file.path()).unwrap();
    assert_eq!(signals.len(), 3);
    let store = CusumSignalStore::new(signals);

    let filter = CusumFilter { strategy: Some("trend_follow".to_string()), ..Default::default() };
    let matching: Vec<_> = store.buy_signals().into_iter().filter(|s| filter.matches(s)).collect();
    assert_eq!(matching.len(), 2);

    let report = run_cusum_fold(&candles, "KRW-ETH", &store, &filter, dec!(10_000_000)).await.unwrap();
    assert_eq!(report.trades.len(), 2);
    assert!(report.final_capital > dec!(10_000_000));

    let aggregates = cusum_aggregates(&report, &matching);
    assert_eq!(aggregates.mean_confidence, dec!(0.75));
    assert_eq!(aggregates.mean_selectivity_pct, dec!(5.5));
}
