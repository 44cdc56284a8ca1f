use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracker_store::connection::{Connection, OpenFlags};
use tracker_store::http::HttpServer;

fn usage() -> &'static str {
    "tracker-store --store <path> --ontology <dir> <command>\n\n\
     Commands:\n  \
     query <sparql>    run a SPARQL query and print TSV-ish results to stdout\n  \
     update <sparql>   run a SPARQL update\n  \
     serve [--port N]  serve the SPARQL HTTP endpoint (default port 7878)\n\n\
     <sparql> may be \"-\" to read the query/update text from stdin."
}

struct Args {
    store: PathBuf,
    ontology: PathBuf,
    readonly: bool,
    command: Command,
}

enum Command {
    Query(String),
    Update(String),
    Serve { port: u16 },
}

fn parse_args() -> Result<Args, String> {
    let mut store = None;
    let mut ontology = None;
    let mut readonly = false;
    let mut args = std::env::args().skip(1).peekable();
    let mut rest = Vec::new();

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--store" => store = Some(PathBuf::from(args.next().ok_or("--store requires a path")?)),
            "--ontology" => ontology = Some(PathBuf::from(args.next().ok_or("--ontology requires a path")?)),
            "--readonly" => readonly = true,
            _ => rest.push(arg),
        }
    }

    let store = store.ok_or("missing --store <path>")?;
    let ontology = ontology.ok_or("missing --ontology <dir>")?;

    let mut rest = rest.into_iter();
    let command = match rest.next().as_deref() {
        Some("query") => Command::Query(read_sparql_arg(rest.next())?),
        Some("update") => Command::Update(read_sparql_arg(rest.next())?),
        Some("serve") => {
            let mut port = 7878u16;
            while let Some(flag) = rest.next() {
                if flag == "--port" {
                    port = rest.next().ok_or("--port requires a number")?.parse().map_err(|_| "invalid --port")?;
                }
            }
            Command::Serve { port }
        }
        Some(other) => return Err(format!("unknown command: {other}")),
        None => return Err("missing command".to_string()),
    };

    Ok(Args { store, ontology, readonly, command })
}

fn read_sparql_arg(arg: Option<String>) -> Result<String, String> {
    match arg.as_deref() {
        Some("-") | None => {
            use std::io::Read;
            let mut text = String::new();
            std::io::stdin().read_to_string(&mut text).map_err(|e| e.to_string())?;
            Ok(text)
        }
        Some(text) => Ok(text.to_string()),
    }
}

fn print_cursor(mut cursor: tracker_store::connection::Cursor) {
    let columns = cursor.n_columns();
    for i in 0..columns {
        if i > 0 {
            print!("\t");
        }
        print!("{}", cursor.variable_name(i).unwrap_or(""));
    }
    println!();
    while cursor.next() {
        for i in 0..columns {
            if i > 0 {
                print!("\t");
            }
            match cursor.get_string(i) {
                Some((value, Some(lang))) => print!("{value}@{lang}"),
                Some((value, None)) => print!("{value}"),
                None => {}
            }
        }
        println!();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let args = match parse_args() {
        Ok(args) => args,
        Err(err) => {
            eprintln!("error: {err}\n\n{}", usage());
            return ExitCode::FAILURE;
        }
    };

    let flags = OpenFlags { readonly: args.readonly, ..OpenFlags::default() };
    let conn = match Connection::open(flags, &args.store, &args.ontology) {
        Ok(conn) => conn,
        Err(err) => {
            eprintln!("failed to open {}: {err}", args.store.display());
            return ExitCode::FAILURE;
        }
    };

    let cancel = CancellationToken::new();
    match args.command {
        Command::Query(sparql) => match conn.query(&sparql, &cancel) {
            Ok(cursor) => print_cursor(cursor),
            Err(err) => {
                eprintln!("query failed: {err}");
                return ExitCode::FAILURE;
            }
        },
        Command::Update(sparql) => match conn.update(&sparql, &cancel) {
            Ok(summary) => println!("ok: {} triples inserted, {} removed", summary.inserted, summary.deleted),
            Err(err) => {
                eprintln!("update failed: {err}");
                return ExitCode::FAILURE;
            }
        },
        Command::Serve { port } => {
            let server = HttpServer::new(std::sync::Arc::new(conn), port);
            if let Err(err) = server.start().await {
                eprintln!("server error: {err}");
                return ExitCode::FAILURE;
            }
        }
    }

    ExitCode::SUCCESS
}
