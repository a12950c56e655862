use std::fs::File;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use structopt::StructOpt;
use tracing_subscriber::EnvFilter;

use edict::{Error, ErrorPolicy, LoadOptions, Loader, Pipeline, Protocols, Record, StringMatch};

#[derive(Clone, Copy, Debug)]
struct OnError(ErrorPolicy);

impl FromStr for OnError {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "abort" => Ok(OnError(ErrorPolicy::Abort)),
            "skip" => Ok(OnError(ErrorPolicy::SkipRecord)),
            "keep" => Ok(OnError(ErrorPolicy::KeepOriginal)),
            other => Err(anyhow!("unknown error policy {:?}", other)),
        }
    }
}

/// Transform CSV records with an edict program.
#[derive(Debug, StructOpt)]
#[structopt(name = "edict")]
struct Opt {
    /// Program to run
    #[structopt(parse(from_os_str))]
    program: PathBuf,

    /// Input CSV; standard input when omitted
    #[structopt(parse(from_os_str))]
    input: Option<PathBuf>,

    /// Output CSV; standard output when omitted
    #[structopt(short, long, parse(from_os_str))]
    output: Option<PathBuf>,

    /// What to do with a record that fails: abort, skip or keep
    #[structopt(long, default_value = "abort")]
    on_error: OnError,

    /// Match string patterns against the whole value instead of a substring
    #[structopt(long)]
    exact_match: bool,

    /// Process records on all cores
    #[structopt(long)]
    parallel: bool,
}

fn read_records(input: Box<dyn Read>) -> Result<(Vec<String>, Vec<Record>)> {
    let mut reader = csv::Reader::from_reader(input);
    let headers: Vec<String> = reader
        .headers()
        .context("failed to read CSV header")?
        .iter()
        .map(str::to_owned)
        .collect();

    let mut records = vec![];
    for (idx, row) in reader.records().enumerate() {
        let row = row.with_context(|| format!("failed to read row {}", idx + 1))?;
        records.push(headers.iter().map(String::as_str).zip(row.iter()).collect());
    }
    Ok((headers, records))
}

fn write_records(output: Box<dyn Write>, fields: &[String], records: &[Record]) -> Result<()> {
    let mut writer = csv::Writer::from_writer(output);
    writer.write_record(fields)?;
    for record in records {
        writer.write_record(fields.iter().map(|field| record.get(field)))?;
    }
    writer.flush().context("failed to write output")?;
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let opt = Opt::from_args();

    let string_match = if opt.exact_match {
        StringMatch::Exact
    } else {
        StringMatch::Contains
    };
    let options = LoadOptions {
        protocols: Protocols::default(),
        string_match,
    };
    let program = Loader::new()
        .options(options)
        .load_path(&opt.program.to_string_lossy())
        .map_err(Error::from)?;

    let input: Box<dyn Read> = match &opt.input {
        Some(path) => Box::new(
            File::open(path).with_context(|| format!("cannot open {}", path.display()))?,
        ),
        None => Box::new(io::stdin()),
    };
    let (headers, records) = read_records(input)?;
    tracing::info!(records = records.len(), "read input");

    let pipeline = Pipeline::new(&program).policy(opt.on_error.0);
    let output = if opt.parallel {
        pipeline.run_parallel(records)
    } else {
        pipeline.run(records)
    }
    .map_err(Error::from)?;
    if !output.errors.is_empty() {
        tracing::warn!(failed = output.errors.len(), "some records failed");
    }

    let sink: Box<dyn Write> = match &opt.output {
        Some(path) => Box::new(
            File::create(path).with_context(|| format!("cannot create {}", path.display()))?,
        ),
        None => Box::new(io::stdout()),
    };
    write_records(sink, &program.fields(&headers), &output.records)
}
