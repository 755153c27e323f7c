use anyhow::{anyhow, bail, Result};
use tracing::{info, warn};

use covisit::ensemble::{ensemble, replace_type, EnsembleType, Submission};
use covisit::io::{write_submission, EventType};
use covisit::logging::init_logging;

const USAGE: &str = "usage: ensemble -e <voting|rank-weighting> [-w <weight>]... [-n <n_top>] \
                     [-o <out.csv>] <submission.csv>...\n       \
                     ensemble --replace <clicks|carts|orders> [-o <out.csv>] <base.csv> <to_add.csv>";

struct Args {
    submission_paths: Vec<String>,
    weights: Vec<f64>,
    ensemble_type: Option<EnsembleType>,
    n_top: Option<usize>,
    replace: Option<EventType>,
    out_path: Option<String>,
}

fn parse_args() -> Result<Args> {
    let mut args = Args {
        submission_paths: Vec::new(),
        weights: Vec::new(),
        ensemble_type: None,
        n_top: None,
        replace: None,
        out_path: None,
    };
    let mut raw = std::env::args().skip(1);
    while let Some(arg) = raw.next() {
        let mut value = |name: &str| raw.next().ok_or_else(|| anyhow!("{} needs a value\n{}", name, USAGE));
        match arg.as_str() {
            "-w" | "--weights" => args.weights.push(value(&arg)?.parse()?),
            "-e" | "--ensemble-type" => args.ensemble_type = Some(value(&arg)?.parse()?),
            "-n" | "--n-top" => args.n_top = Some(value(&arg)?.parse()?),
            "-o" | "--out" => args.out_path = Some(value(&arg)?),
            "--replace" => {
                args.replace = Some(value(&arg)?.parse().map_err(|reason: String| anyhow!(reason))?)
            }
            _ => args.submission_paths.push(arg.clone()),
        }
    }
    if args.submission_paths.is_empty() {
        bail!("no submission csv given\n{}", USAGE);
    }
    Ok(args)
}

fn main() -> Result<()> {
    init_logging("");
    let args = parse_args()?;
    let submissions = args
        .submission_paths
        .iter()
        .map(Submission::read_csv)
        .collect::<covisit::Result<Vec<_>>>()?;

    let (rows, default_out_path) = match (args.replace, args.ensemble_type) {
        (Some(event_type), _) => {
            if submissions.len() != 2 {
                bail!("--replace needs exactly two submissions\n{}", USAGE);
            }
            let rows = replace_type(&submissions[0], &submissions[1], event_type)?;
            (rows, format!("concat_on_{}.csv", event_type))
        }
        (None, Some(ensemble_type)) => {
            if args.n_top.is_none() && ensemble_type == EnsembleType::Voting {
                warn!("voting without --n-top tends to score worse");
            }
            let weights = if args.weights.is_empty() {
                None
            } else {
                Some(args.weights.as_slice())
            };
            info!(
                submissions = submissions.len(),
                weights = ?args.weights,
                n_top = ?args.n_top,
                "combining by {}",
                ensemble_type
            );
            let rows = ensemble(&submissions, weights, ensemble_type, args.n_top)?;
            (rows, format!("{}_submission.csv", ensemble_type))
        }
        (None, None) => bail!("missing --ensemble-type\n{}", USAGE),
    };

    let out_path = args.out_path.unwrap_or(default_out_path);
    write_submission(&out_path, &rows)?;
    info!(rows = rows.len(), "saved as {}", out_path);
    Ok(())
}
