use crate::error::ListenerError;
use crate::protocol::{ResultListener, ResultRow};
use serde::Deserialize;
use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::PathBuf;
use tracing::debug;

#[derive(Debug, Clone, Deserialize)]
pub struct JsonlSettings {
    pub path: PathBuf,
    /// Keep rows from earlier sweeps instead of truncating.
    #[serde(default)]
    pub append: bool,
}

/// Writes each result row as one JSON line. The file is opened in
/// `pre_process` and flushed in `post_process`.
pub struct JsonlResultListener {
    settings: JsonlSettings,
    writer: Option<BufWriter<fs::File>>,
    rows: usize,
}

impl JsonlResultListener {
    pub fn new(settings: JsonlSettings) -> Self {
        Self {
            settings,
            writer: None,
            rows: 0,
        }
    }

    pub fn rows_written(&self) -> usize {
        self.rows
    }
}

impl ResultListener for JsonlResultListener {
    fn pre_process(&mut self) -> Result<(), ListenerError> {
        let path = &self.settings.path;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let file = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .append(self.settings.append)
            .truncate(!self.settings.append)
            .open(path)?;
        self.writer = Some(BufWriter::new(file));
        self.rows = 0;
        debug!(path = %path.display(), append = self.settings.append, "results file opened");
        Ok(())
    }

    fn accept_result_row(&mut self, row: ResultRow) -> Result<(), ListenerError> {
        let writer = self.writer.as_mut().ok_or_else(|| {
            ListenerError::Rejected(format!(
                "{} is not open; pre_process was not called",
                self.settings.path.display()
            ))
        })?;
        serde_json::to_writer(&mut *writer, &row)?;
        writer.write_all(b"\n")?;
        self.rows += 1;
        Ok(())
    }

    fn post_process(&mut self) -> Result<(), ListenerError> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
            debug!(rows = self.rows, path = %self.settings.path.display(), "results file closed");
        }
        Ok(())
    }
}

/// Prints rows as JSON lines, to stdout unless another writer is given.
pub struct StdoutListener {
    out: Box<dyn Write>,
}

impl StdoutListener {
    pub fn new() -> Self {
        Self::with_writer(Box::new(io::stdout()))
    }

    pub fn with_writer(out: Box<dyn Write>) -> Self {
        Self { out }
    }
}

impl Default for StdoutListener {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultListener for StdoutListener {
    fn accept_result_row(&mut self, row: ResultRow) -> Result<(), ListenerError> {
        let line = serde_json::to_string(&row)?;
        writeln!(self.out, "{}", line)?;
        Ok(())
    }

    fn post_process(&mut self) -> Result<(), ListenerError> {
        self.out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::{json, Value};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "sweep_listener_{}_{}_{}",
            tag,
            std::process::id(),
            Utc::now().timestamp_micros()
        ));
        fs::create_dir_all(&dir).expect("temp dir");
        dir
    }

    fn row(run: u32) -> ResultRow {
        ResultRow::new()
            .with_key("run", run)
            .with_result("accuracy", 0.5)
    }

    fn read_rows(path: &std::path::Path) -> Vec<Value> {
        fs::read_to_string(path)
            .expect("read")
            .lines()
            .map(|l| serde_json::from_str(l).expect("json line"))
            .collect()
    }

    #[test]
    fn jsonl_listener_writes_one_line_per_row() {
        let dir = temp_dir("jsonl");
        let path = dir.join("out").join("results.jsonl");
        let mut listener = JsonlResultListener::new(JsonlSettings {
            path: path.clone(),
            append: false,
        });
        listener.pre_process().expect("open");
        listener.accept_result_row(row(1)).expect("row 1");
        listener.accept_result_row(row(2)).expect("row 2");
        listener.post_process().expect("close");

        let rows = read_rows(&path);
        assert_eq!(listener.rows_written(), 2);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1]["key"]["run"], json!(2));
        assert_eq!(rows[0]["result"]["accuracy"], json!(0.5));
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn jsonl_listener_truncates_unless_appending() {
        let dir = temp_dir("append");
        let path = dir.join("results.jsonl");
        for append in [false, true] {
            let mut listener = JsonlResultListener::new(JsonlSettings {
                path: path.clone(),
                append,
            });
            listener.pre_process().expect("open");
            listener.accept_result_row(row(1)).expect("row");
            listener.post_process().expect("close");
        }
        assert_eq!(read_rows(&path).len(), 2);

        let mut listener = JsonlResultListener::new(JsonlSettings {
            path: path.clone(),
            append: false,
        });
        listener.pre_process().expect("open");
        listener.post_process().expect("close");
        assert!(read_rows(&path).is_empty());
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn jsonl_listener_rejects_rows_before_pre_process() {
        let mut listener = JsonlResultListener::new(JsonlSettings {
            path: PathBuf::from("never-opened.jsonl"),
            append: false,
        });
        assert!(matches!(
            listener.accept_result_row(row(1)),
            Err(ListenerError::Rejected(_))
        ));
    }

    #[derive(Clone, Default)]
    struct SharedBuf(Rc<RefCell<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn stdout_listener_prints_json_lines() {
        let buf = SharedBuf::default();
        let mut listener = StdoutListener::with_writer(Box::new(buf.clone()));
        listener.accept_result_row(row(3)).expect("row");
        listener.post_process().expect("flush");
        let text = String::from_utf8(buf.0.borrow().clone()).expect("utf8");
        assert_eq!(
            text,
            "{\"key\":{\"run\":3},\"result\":{\"accuracy\":0.5}}\n"
        );
    }
}
