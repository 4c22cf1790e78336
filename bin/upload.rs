use clap::{Arg, ArgAction, Command};
use stock_ingest::{
    commit_to_file, gate, stage_file, ColumnKey, Notice, SessionEvent, UploadSession,
    ValidationPolicy,
};
use std::path::PathBuf;
use std::time::Instant;

/// `ROW:COLUMN=VALUE`, ROW being the 1-based row number shown in error messages.
fn parse_edit(spec: &str) -> anyhow::Result<(usize, ColumnKey, String)> {
    let (target, value) = spec
        .split_once('=')
        .ok_or_else(|| anyhow::anyhow!("edit '{spec}' is not ROW:COLUMN=VALUE"))?;
    let (row, column) = target
        .split_once(':')
        .ok_or_else(|| anyhow::anyhow!("edit '{spec}' is not ROW:COLUMN=VALUE"))?;
    let row: usize = row.trim().parse()?;
    if row < 2 {
        anyhow::bail!("edit '{spec}': row 1 is the header, data starts at row 2");
    }
    Ok((row - 2, ColumnKey::parse(column), value.to_string()))
}

fn report(notice: &Notice) {
    match notice {
        Notice::Success(msg) => println!("ok: {msg}"),
        Notice::Error(msg) => println!("error: {msg}"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let matches = Command::new("upload")
        .about("Validate a stock CSV and commit it to a stock file")
        .arg(Arg::new("path").long("path").value_parser(clap::value_parser!(PathBuf)).required(true))
        .arg(Arg::new("batch").long("batch").help("Batch number the stock is filed under").default_value(""))
        .arg(Arg::new("region").long("region").help("Region every row is assigned to").default_value(""))
        .arg(Arg::new("set").long("set").help("Fix a cell before committing: ROW:COLUMN=VALUE").action(ArgAction::Append))
        .arg(Arg::new("store").long("store").help("Stock CSV to append to").value_parser(clap::value_parser!(PathBuf)).default_value("stock.csv"))
        .arg(Arg::new("require-stock-id").long("require-stock-id").help("Validate as a re-import where stock_id must be present").action(ArgAction::SetTrue))
        .arg(Arg::new("strict-types").long("strict-types").help("Reject type labels that are not FS, DO or DVS").action(ArgAction::SetTrue))
        .arg(Arg::new("dry-run").long("dry-run").help("Validate only, never commit").action(ArgAction::SetTrue))
        .get_matches();

    let path = matches.get_one::<PathBuf>("path").unwrap();
    let mut policy = if matches.get_flag("require-stock-id") {
        ValidationPolicy::with_stock_id()
    } else {
        ValidationPolicy::upload()
    };
    if matches.get_flag("strict-types") {
        policy = policy.strict();
    }

    let start = Instant::now();
    let mut session = UploadSession::new(policy);

    let notice = stage_file(&mut session, path).await?;
    report(&notice);
    if session.rows().is_empty() && session.header().is_empty() {
        anyhow::bail!("nothing staged from {}", path.display());
    }
    println!(
        "source={} rows={} columns=[{}]",
        path.display(),
        session.rows().len(),
        session.header().describe()
    );

    for spec in matches.get_many::<String>("set").into_iter().flatten() {
        let (row_index, column, value) = parse_edit(spec)?;
        session.apply(SessionEvent::EditCell {
            row_index,
            column,
            value,
        })?;
    }

    session.apply(SessionEvent::SetBatchLabel(
        matches.get_one::<String>("batch").unwrap().clone(),
    ))?;
    session.apply(SessionEvent::SetPartitionKey(
        matches.get_one::<String>("region").unwrap().clone(),
    ))?;

    for err in session.errors() {
        println!("  {err}");
    }

    if let Err(block) = gate::evaluate(session.gate_inputs()) {
        println!("blocked: {block}");
        std::process::exit(2);
    }
    if matches.get_flag("dry-run") {
        println!("dry run: {} rows ready to upload", session.rows().len());
        return Ok(());
    }

    let store_path = matches.get_one::<PathBuf>("store").unwrap();
    let receipt = commit_to_file(&mut session, store_path).await?;
    report(&Notice::Success(format!(
        "{} stock items uploaded successfully",
        receipt.inserted
    )));
    for (ty, count) in &receipt.by_type {
        println!("  {ty}: {count}");
    }
    if receipt.unclassified > 0 {
        println!("  unclassified: {}", receipt.unclassified);
    }

    let elapsed = start.elapsed().as_secs_f64();
    println!(
        "batch={} region={} store={}\nelapsed={:.3}s",
        receipt.batch,
        receipt.region_id,
        store_path.display(),
        elapsed
    );
    Ok(())
}
