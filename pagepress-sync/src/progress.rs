pub type LineSink = Box<dyn Fn(&str) + Send + Sync>;

/// Injected progress reporting. `log` always emits, `trace` only when the
/// verbose flag is set, `error` goes to the error sink.
pub struct Progress {
    verbose: bool,
    out: LineSink,
    err: LineSink,
}

impl Progress {
    pub fn stdio(verbose: bool) -> Self {
        Self::with_sinks(
            verbose,
            Box::new(|line| println!("[pagepress] {line}")),
            Box::new(|line| eprintln!("[pagepress] {line}")),
        )
    }

    pub fn with_sinks(verbose: bool, out: LineSink, err: LineSink) -> Self {
        Self { verbose, out, err }
    }

    pub fn log(&self, line: &str) {
        (self.out)(line);
    }

    pub fn trace(&self, line: &str) {
        if self.verbose {
            (self.out)(line);
        }
    }

    pub fn error(&self, line: &str) {
        (self.err)(line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn capturing() -> (Arc<Mutex<Vec<String>>>, LineSink) {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink_lines = Arc::clone(&lines);
        let sink: LineSink = Box::new(move |line: &str| {
            sink_lines.lock().unwrap().push(line.to_string());
        });
        (lines, sink)
    }

    #[test]
    fn trace_is_silent_unless_verbose() {
        let (lines, out) = capturing();
        let (_, err) = capturing();
        let progress = Progress::with_sinks(false, out, err);

        progress.trace("hidden");
        progress.log("shown");

        assert_eq!(*lines.lock().unwrap(), vec!["shown".to_string()]);
    }

    #[test]
    fn trace_emits_when_verbose() {
        let (lines, out) = capturing();
        let (_, err) = capturing();
        let progress = Progress::with_sinks(true, out, err);

        progress.trace("visible");

        assert_eq!(*lines.lock().unwrap(), vec!["visible".to_string()]);
    }

    #[test]
    fn errors_go_to_the_error_sink() {
        let (out_lines, out) = capturing();
        let (err_lines, err) = capturing();
        let progress = Progress::with_sinks(false, out, err);

        progress.error("broken");

        assert!(out_lines.lock().unwrap().is_empty());
        assert_eq!(*err_lines.lock().unwrap(), vec!["broken".to_string()]);
    }
}
