//! Chrome trace output.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::sync::Mutex;
use std::time::Instant;

static TRACE: Mutex<Option<Trace>> = Mutex::new(None);

struct Trace {
    start: Instant,
    w: BufWriter<File>,
}

impl Trace {
    fn new(path: &str) -> std::io::Result<Self> {
        let mut w = BufWriter::new(File::create(path)?);
        writeln!(w, "[")?;
        Ok(Trace {
            start: Instant::now(),
            w,
        })
    }

    fn write_complete(&mut self, name: &str, start: Instant, end: Instant) -> std::io::Result<()> {
        write!(
            self.w,
            "{{ \"pid\": 0, \"name\": {:?}, \"ts\": {}, \"ph\": \"X\", \"dur\": {} }}",
            name,
            start.duration_since(self.start).as_micros(),
            end.duration_since(start).as_micros()
        )
    }

    fn close(&mut self) -> std::io::Result<()> {
        let start = self.start;
        self.write_complete("main", start, Instant::now())?;
        writeln!(self.w, "]")?;
        self.w.flush()
    }
}

fn with_trace<T>(f: impl FnOnce(&mut Option<Trace>) -> T) -> T {
    let mut guard = match TRACE.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    f(&mut guard)
}

pub fn open(path: &str) -> std::io::Result<()> {
    let trace = Trace::new(path)?;
    with_trace(|t| *t = Some(trace));
    Ok(())
}

/// Time `f` and record it as a complete event, if tracing is open.
#[inline]
pub fn scope<T>(name: &'static str, f: impl FnOnce() -> T) -> T {
    let start = Instant::now();
    let result = f();
    let end = Instant::now();
    with_trace(|t| {
        if let Some(t) = t {
            // Trace output is best effort.
            let _ = t
                .write_complete(name, start, end)
                .and_then(|_| writeln!(t.w, ","));
        }
    });
    result
}

pub fn close() -> std::io::Result<()> {
    with_trace(|t| match t.take() {
        Some(mut t) => t.close(),
        None => Ok(()),
    })
}
