use std::ffi::OsString;
use std::io::{self, Write};
use std::path::PathBuf;

use chronostore_core::config::PROPERTIES_FILE;
use chronostore_core::{ChronoError, Datastore, StoreConfig, StoreProperties, StoreSummary};

#[derive(Debug, Clone, PartialEq, Eq)]
struct CliOptions {
    root: Option<PathBuf>,
    json: bool,
    show_help: bool,
}

fn main() {
    let mut stdout = io::stdout();
    let mut stderr = io::stderr();

    let exit_code = run(std::env::args_os(), &mut stdout, &mut stderr);
    if exit_code != 0 {
        std::process::exit(exit_code);
    }
}

fn run<I, W, E>(args: I, out: &mut W, err: &mut E) -> i32
where
    I: IntoIterator<Item = OsString>,
    W: Write,
    E: Write,
{
    let options = match parse_args(args) {
        Ok(options) => options,
        Err(message) => {
            let _ = writeln!(err, "error: {message}");
            let _ = write_usage(err);
            return 2;
        }
    };

    if options.show_help {
        if write_usage(out).is_err() {
            return 1;
        }
        return 0;
    }

    let Some(root) = options.root else {
        let _ = writeln!(err, "error: missing store directory");
        let _ = write_usage(err);
        return 2;
    };

    // Never create a store as a side effect of inspecting one.
    if !root.join(PROPERTIES_FILE).is_file() {
        let _ = writeln!(
            err,
            "error: {} is not a chronostore directory (no {PROPERTIES_FILE})",
            root.display()
        );
        return 1;
    }

    let summary = match summarize(root) {
        Ok(summary) => summary,
        Err(error) => return report_error(&error, err),
    };

    let written = if options.json {
        serde_json::to_string_pretty(&summary)
            .map_err(io::Error::other)
            .and_then(|text| writeln!(out, "{text}"))
    } else {
        write_summary(&summary, out)
    };
    if written.is_err() {
        return 1;
    }
    0
}

fn summarize(root: PathBuf) -> Result<StoreSummary, ChronoError> {
    // Open with whatever capacities the store was created with.
    let config = match StoreProperties::read(&root.join(PROPERTIES_FILE))? {
        Some(properties) => StoreConfig::new(root)
            .with_chronicle_spine_capacity(properties.chronicle_spine_capacity)
            .with_index_spine_capacity(properties.index_spine_capacity),
        None => StoreConfig::new(root),
    };
    let store = Datastore::new(config);
    store.startup()?;
    let summary = store.summary();
    let shutdown = store.shutdown();
    let summary = summary?;
    shutdown?;
    Ok(summary)
}

fn report_error<E: Write>(error: &ChronoError, err: &mut E) -> i32 {
    let _ = writeln!(err, "error: {error}");
    if let Some(hint) = error.suggestion() {
        let _ = writeln!(err, "hint: {hint}");
    }
    error.exit_code()
}

fn parse_args<I>(args: I) -> Result<CliOptions, String>
where
    I: IntoIterator<Item = OsString>,
{
    let mut iter = args.into_iter();
    let _argv0 = iter.next();

    let mut root: Option<PathBuf> = None;
    let mut json = false;
    let mut show_help = false;

    for argument in iter {
        let arg = argument.to_string_lossy();
        match arg.as_ref() {
            "-h" | "--help" => show_help = true,
            "--json" => json = true,
            flag if flag.starts_with('-') => {
                return Err(format!("unknown option `{flag}`"));
            }
            _ => {
                if root.is_some() {
                    return Err(String::from("only one store directory may be given"));
                }
                root = Some(PathBuf::from(argument));
            }
        }
    }

    Ok(CliOptions {
        root,
        json,
        show_help,
    })
}

fn write_summary<W: Write>(summary: &StoreSummary, out: &mut W) -> io::Result<()> {
    writeln!(out, "root:          {}", summary.root.display())?;
    writeln!(out, "start state:   {}", summary.start_state)?;
    match summary.datastore_id {
        Some(id) => writeln!(out, "datastore id:  {id}")?,
        None => writeln!(out, "datastore id:  (unset)")?,
    }
    writeln!(out, "size on disk:  {} bytes", summary.size_on_disk)?;
    writeln!(out, "assemblages:   {}", summary.assemblages.len())?;
    for assemblage in &summary.assemblages {
        writeln!(
            out,
            "  {:>12}  {:<8} {:<16} {} elements",
            assemblage.nid,
            assemblage.object_type,
            assemblage.version_type,
            assemblage.element_count
        )?;
    }
    Ok(())
}

fn write_usage<W: Write>(out: &mut W) -> io::Result<()> {
    writeln!(
        out,
        "Usage: chronostore <ROOT> [--json]\n\
         \n\
         Print a summary of the chronostore rooted at ROOT.\n\
         \n\
         Options:\n\
         \x20 --json      Emit the summary as JSON\n\
         \x20 -h, --help  Show this help"
    )
}

#[cfg(test)]
mod tests {
    use std::ffi::OsString;

    use chronostore_core::{ChronicleRecord, Nid, ObjectType, VersionType};

    use super::*;

    fn parse_from(args: &[&str]) -> Result<CliOptions, String> {
        let os_args: Vec<OsString> = args.iter().map(OsString::from).collect();
        parse_args(os_args)
    }

    fn run_with(args: &[&str]) -> (i32, String, String) {
        let os_args: Vec<OsString> = args.iter().map(OsString::from).collect();
        let mut out = Vec::new();
        let mut err = Vec::new();
        let code = run(os_args, &mut out, &mut err);
        (
            code,
            String::from_utf8(out).unwrap(),
            String::from_utf8(err).unwrap(),
        )
    }

    fn seeded_store(dir: &std::path::Path) {
        let store = Datastore::new(StoreConfig::new(dir).with_chronicle_spine_capacity(16));
        store.startup().unwrap();
        let record = ChronicleRecord::new(
            Nid::new(-5000).unwrap(),
            Nid::new(-100).unwrap(),
            ObjectType::Semantic,
            VersionType::String,
            b"h",
        )
        .with_version(b"hello");
        store.put_chronicle(&record).unwrap();
        store.shutdown().unwrap();
    }

    #[test]
    fn test_parse_args() {
        let options = parse_from(&["chronostore", "/tmp/store", "--json"]).unwrap();
        assert_eq!(options.root, Some(PathBuf::from("/tmp/store")));
        assert!(options.json);
        assert!(!options.show_help);

        assert!(parse_from(&["chronostore", "--help"]).unwrap().show_help);
        assert!(parse_from(&["chronostore", "--bogus"]).is_err());
        assert!(parse_from(&["chronostore", "a", "b"]).is_err());
    }

    #[test]
    fn test_help_and_usage_errors() {
        let (code, out, _) = run_with(&["chronostore", "-h"]);
        assert_eq!(code, 0);
        assert!(out.starts_with("Usage: chronostore"));

        let (code, _, err) = run_with(&["chronostore"]);
        assert_eq!(code, 2);
        assert!(err.contains("missing store directory"));
    }

    #[test]
    fn test_refuses_non_store_directory() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_str().unwrap();
        let (code, _, err) = run_with(&["chronostore", root]);
        assert_eq!(code, 1);
        assert!(err.contains("not a chronostore directory"));
        assert!(!dir.path().join(PROPERTIES_FILE).exists());
    }

    #[test]
    fn test_text_summary() {
        let dir = tempfile::tempdir().unwrap();
        seeded_store(dir.path());
        let (code, out, err) = run_with(&["chronostore", dir.path().to_str().unwrap()]);
        assert_eq!(code, 0, "stderr: {err}");
        assert!(out.contains("start state:   EXISTING_DATASTORE"));
        assert!(out.contains("assemblages:   1"));
        assert!(out.contains("-100"));
        assert!(out.contains("1 elements"));
    }

    #[test]
    fn test_json_summary() {
        let dir = tempfile::tempdir().unwrap();
        seeded_store(dir.path());
        let (code, out, _) = run_with(&["chronostore", dir.path().to_str().unwrap(), "--json"]);
        assert_eq!(code, 0);
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["start_state"], "EXISTING_DATASTORE");
        assert_eq!(value["assemblages"][0]["nid"], -100);
        assert_eq!(value["assemblages"][0]["element_count"], 1);
        assert!(value["datastore_id"].is_string());
    }
}
