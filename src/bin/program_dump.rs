//! Print the belief program of a persisted issue.
//!
//! Usage:
//!   program_dump <db.sqlite> <issue> [--marginals]
//!
//! The program is recompiled from the stored graph and prices, exactly as
//! the service does after a restart. With `--marginals` the solved
//! probabilities follow as one JSON object.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use serde_json::json;

use arggraph::belief::solver::WorldSolver;
use arggraph::config::Config;
use arggraph::graph::store::{ArgumentGraph, BeliefServices};
use arggraph::market::PriceBook;
use arggraph::storage::IssueStore;
use arggraph::IssueId;

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 3 {
        eprintln!("usage: program_dump <db.sqlite> <issue> [--marginals]");
        std::process::exit(2);
    }
    let path = &args[1];
    let issue: IssueId = args[2].parse().with_context(|| format!("bad issue id {}", args[2]))?;
    let show_marginals = args.iter().skip(3).any(|a| a == "--marginals");

    let config = Config::from_env();
    let mut store = IssueStore::new(path)?;
    store.init()?;
    let record = store.load(issue)?.ok_or_else(|| anyhow!("issue {} not found in {}", issue, path))?;

    let prices = Arc::new(PriceBook::new());
    prices.restore(issue, record.prices.clone());
    let services = BeliefServices {
        solver: Arc::new(WorldSolver::new(config.solver)),
        prices,
    };
    let graph = ArgumentGraph::restore(record, config.limits, services)?;

    print!("{}", graph.program_text());
    if show_marginals {
        let marginals: serde_json::Map<String, serde_json::Value> = graph
            .marginals()
            .iter()
            .map(|(id, p)| (id.to_string(), json!(p)))
            .collect();
        println!("{}", serde_json::Value::Object(marginals));
    }
    Ok(())
}
