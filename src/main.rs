use std::path::PathBuf;
use std::process::ExitCode;

use clap::builder::RangedU64ValueParser;
use clap::{Parser, Subcommand};
use prettytable::{Cell, Row, Table};
use thiserror::Error;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use slotdb::{
    BUFFER_POOL_SIZE, BufferManager, IndexError, IndexManager, Key, PageId, PagedFileManager,
    RecordError, RecordManager, SharedBufferManager, TableSchema,
};

/// Inspect slotdb table and index files
#[derive(Parser, Debug)]
#[command(name = "slotdb", version)]
struct Cli {
    /// Buffer pool capacity in pages
    #[arg(
        long,
        global = true,
        default_value_t = BUFFER_POOL_SIZE,
        value_parser = RangedU64ValueParser::<usize>::new().range(1..)
    )]
    pool_size: usize,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the header page of a table file
    Header { file: PathBuf },

    /// Print every record of a table file
    Scan {
        file: PathBuf,
        /// Column list, e.g. `id:INT,name:VARCHAR(16),score:FLOAT`
        #[arg(long)]
        schema: TableSchema,
        /// Stop after this many records
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Look up a key range in an index file
    Index {
        file: PathBuf,
        /// Root page of the index
        #[arg(long)]
        root: PageId,
        /// Smallest key, unbounded if omitted
        #[arg(long, allow_hyphen_values = true)]
        lo: Option<Key>,
        /// Largest key, unbounded if omitted
        #[arg(long, allow_hyphen_values = true)]
        hi: Option<Key>,
    },
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Record(#[from] RecordError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error("Schema describes {schema} byte records but the file stores {file} byte records")]
    SchemaSize { schema: usize, file: usize },
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();
    debug!(pool_size = cli.pool_size, "starting");

    let buffer_manager =
        BufferManager::with_capacity(PagedFileManager::new(), cli.pool_size).into_shared();
    let result = match cli.command {
        Command::Header { file } => print_header(buffer_manager, file),
        Command::Scan {
            file,
            schema,
            limit,
        } => print_records(buffer_manager, file, &schema, limit),
        Command::Index { file, root, lo, hi } => print_range(buffer_manager, file, root, lo, hi),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {}", err);
            ExitCode::FAILURE
        }
    }
}

fn print_header(buffer_manager: SharedBufferManager, file: PathBuf) -> Result<(), CliError> {
    let mut records = RecordManager::new(buffer_manager);
    records.open_file(&file)?;
    let header = records.header(&file)?;
    records.close_file(&file)?;

    let mut table = Table::new();
    table.set_titles(Row::new(vec![Cell::new("Field"), Cell::new("Value")]));
    let fields = [
        ("filename", header.filename.clone()),
        ("record_len", header.record_len.to_string()),
        ("record_capacity", header.record_capacity.to_string()),
        ("record_num", header.record_num.to_string()),
        ("page_num", header.page_num.to_string()),
        ("bitmap_len", header.bitmap_len.to_string()),
        ("next_available_page", header.next_available_page.to_string()),
    ];
    for (name, value) in fields {
        table.add_row(Row::new(vec![Cell::new(name), Cell::new(&value)]));
    }
    table.printstd();
    Ok(())
}

fn print_records(
    buffer_manager: SharedBufferManager,
    file: PathBuf,
    schema: &TableSchema,
    limit: Option<usize>,
) -> Result<(), CliError> {
    let mut records = RecordManager::new(buffer_manager);
    records.open_file(&file)?;
    let record_len = records.header(&file)?.record_len;
    if record_len != schema.record_size() {
        return Err(CliError::SchemaSize {
            schema: schema.record_size(),
            file: record_len,
        });
    }

    let mut table = Table::new();
    let mut titles = vec![Cell::new("rid")];
    titles.extend(schema.columns().iter().map(|col| Cell::new(&col.name)));
    table.set_titles(Row::new(titles));

    let scan = records.get_all_records(&file)?;
    for record in scan.take(limit.unwrap_or(usize::MAX)) {
        let record = record?;
        let rid = record.rid();
        let mut cells = vec![Cell::new(&format!("({}, {})", rid.page_id, rid.slot_id))];
        cells.extend(
            record
                .values(schema)?
                .iter()
                .map(|value| Cell::new(&value.to_string())),
        );
        table.add_row(Row::new(cells));
    }
    table.printstd();

    println!("{} rows", table.len());
    records.close_file(&file)?;
    Ok(())
}

fn print_range(
    buffer_manager: SharedBufferManager,
    file: PathBuf,
    root: PageId,
    lo: Option<Key>,
    hi: Option<Key>,
) -> Result<(), CliError> {
    let mut indexes = IndexManager::new(buffer_manager);
    indexes.open_index(&file, root)?;
    let entries = indexes.range_search(&file, lo, hi)?;

    let mut table = Table::new();
    table.set_titles(Row::new(vec![
        Cell::new("key"),
        Cell::new("page"),
        Cell::new("slot"),
    ]));
    for (key, rid) in &entries {
        table.add_row(Row::new(vec![
            Cell::new(&key.to_string()),
            Cell::new(&rid.page_id.to_string()),
            Cell::new(&rid.slot_id.to_string()),
        ]));
    }
    table.printstd();

    if let Some(index) = indexes.get_index(&file) {
        println!("{} entries, height {}", entries.len(), index.height()?);
    }
    indexes.close_index(&file)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_size_must_be_positive() {
        assert!(Cli::try_parse_from(["slotdb", "--pool-size", "0", "header", "t.table"]).is_err());

        let cli = Cli::try_parse_from(["slotdb", "header", "t.table", "--pool-size", "1"]).unwrap();
        assert_eq!(cli.pool_size, 1);

        let cli = Cli::try_parse_from(["slotdb", "header", "t.table"]).unwrap();
        assert_eq!(cli.pool_size, BUFFER_POOL_SIZE);
    }

    #[test]
    fn test_scan_schema_and_negative_bounds() {
        let cli = Cli::try_parse_from([
            "slotdb", "scan", "t.table", "--schema", "id:INT,name:VARCHAR(16)",
        ])
        .unwrap();
        match cli.command {
            Command::Scan { schema, limit, .. } => {
                assert_eq!(schema.record_size(), 25);
                assert_eq!(limit, None);
            }
            other => panic!("unexpected command {:?}", other),
        }

        let cli = Cli::try_parse_from(["slotdb", "index", "t.index", "--root", "0", "--lo", "-5"]).unwrap();
        match cli.command {
            Command::Index { root, lo, hi, .. } => {
                assert_eq!((root, lo, hi), (0, Some(-5), None));
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
