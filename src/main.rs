//! Fetches recent or historical USGS readings for a few stations and
//! prints each station's analysis snapshot as JSON.
//!
//! Usage:
//!   gagewatch <parameter> <start YYYY-MM-DD> <end YYYY-MM-DD> <station>...
//!   gagewatch <parameter> --recent <station>...

use chrono::{NaiveDate, Utc};
use std::error::Error;
use std::time::Duration;

use gagewatch::config::Config;
use gagewatch::ingest::fetch::{Fetch, HttpFetcher, ProxyFallback};
use gagewatch::ingest::usgs::{IvRange, fetch_station_series};
use gagewatch::logging::{self, DataSource};
use gagewatch::session::AnalysisSession;

const USAGE: &str = "usage: gagewatch <parameter> (<start> <end> | --recent) <station>...";

fn parse_args(args: &[String]) -> Result<(String, IvRange, Vec<String>), String> {
    let (parameter, rest) = args.split_first().ok_or(USAGE)?;

    let (range, stations) = match rest {
        [flag, stations @ ..] if flag == "--recent" => (IvRange::recent(Utc::now()), stations),
        [start, end, stations @ ..] => {
            let start = NaiveDate::parse_from_str(start, "%Y-%m-%d")
                .map_err(|e| format!("bad start date '{}': {}", start, e))?;
            let end = NaiveDate::parse_from_str(end, "%Y-%m-%d")
                .map_err(|e| format!("bad end date '{}': {}", end, e))?;
            if end < start {
                return Err("end date is before start date".to_string());
            }
            (IvRange::Dates { start, end }, stations)
        }
        _ => return Err(USAGE.to_string()),
    };

    if stations.is_empty() {
        return Err(USAGE.to_string());
    }
    Ok((parameter.clone(), range, stations.to_vec()))
}

/// Fetches every selected station concurrently and ingests what arrives.
fn fetch_all<F: Fetch + Sync>(
    session: &AnalysisSession,
    fetcher: &F,
    parameter: &str,
    range: &IvRange,
) {
    let stations = session.station_ids();
    let results: Vec<bool> = std::thread::scope(|scope| {
        let handles: Vec<_> = stations
            .iter()
            .map(|station| {
                scope.spawn(move || match fetch_station_series(fetcher, station, parameter, range) {
                    Ok(series) => match session.ingest_iv(station, parameter, &series) {
                        Ok(analysis) => {
                            logging::info(
                                DataSource::Session,
                                Some(station),
                                &format!(
                                    "{} samples, {} alerts",
                                    analysis.series.len(),
                                    analysis.alerts.len()
                                ),
                            );
                            true
                        }
                        Err(e) => {
                            logging::warn(DataSource::Session, Some(station), &e.to_string());
                            false
                        }
                    },
                    Err(e) => {
                        logging::log_fetch_failure(station, "IV fetch", &e);
                        false
                    }
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap_or(false)).collect()
    });

    let successful = results.iter().filter(|ok| **ok).count();
    logging::log_fetch_summary(results.len(), successful, results.len() - successful);
}

fn main() -> Result<(), Box<dyn Error>> {
    let config = Config::load()?;
    logging::init_logger(
        config.logging.level,
        config.logging.file.as_deref(),
        config.logging.timestamps,
    );

    let args: Vec<String> = std::env::args().skip(1).collect();
    let (parameter, range, stations) = parse_args(&args)?;

    let session = AnalysisSession::from_config(&config);
    session.select_parameter(&parameter);
    for station in &stations {
        session.add_station(station)?;
    }

    let http = HttpFetcher::new(Duration::from_secs(config.fetch.timeout_secs))?;
    if config.fetch.use_proxies {
        let fetcher = ProxyFallback::new(http, config.fetch.proxies.clone());
        fetch_all(&session, &fetcher, &parameter, &range);
    } else {
        fetch_all(&session, &http, &parameter, &range);
    }

    let analyses = session.analyses();
    if analyses.is_empty() {
        return Err("No data available for the selected stations and time period.".into());
    }
    for analysis in &analyses {
        println!("{}", serde_json::to_string_pretty(analysis.as_ref())?);
    }
    Ok(())
}
