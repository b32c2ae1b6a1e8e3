//! Destinations for streamed fragments.
//!
//! The client calls [`FragmentSink::on_fragment`] once per fragment, in
//! arrival order, before it reads anything further from the server.

use std::io::{self, Write};

/// Receives generated text as it streams in.
///
/// Implemented for [`WriterSink`], [`BufferSink`], and any `FnMut(&str)`
/// closure.
///
/// # Examples
///
/// ```
/// use ollama_prompt::llm::FragmentSink;
///
/// let mut seen = Vec::new();
/// let mut sink = |fragment: &str| seen.push(fragment.len());
/// sink.on_fragment("Hello").unwrap();
/// sink.on_fragment(", world").unwrap();
/// assert_eq!(seen, vec![5, 7]);
/// ```
pub trait FragmentSink {
    /// Handles one fragment. An error aborts the generation.
    fn on_fragment(&mut self, fragment: &str) -> io::Result<()>;
}

impl<F> FragmentSink for F
where
    F: FnMut(&str),
{
    fn on_fragment(&mut self, fragment: &str) -> io::Result<()> {
        self(fragment);
        Ok(())
    }
}

/// Writes every fragment to an [`io::Write`] and flushes immediately, so
/// partial output is visible before the response is complete.
#[derive(Debug)]
pub struct WriterSink<W> {
    writer: W,
}

/// The console sink the CLI uses.
pub type StdoutSink = WriterSink<io::Stdout>;

impl<W: Write> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Consumes the sink, returning the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl StdoutSink {
    /// A sink bound to the process's standard output.
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> FragmentSink for WriterSink<W> {
    fn on_fragment(&mut self, fragment: &str) -> io::Result<()> {
        self.writer.write_all(fragment.as_bytes())?;
        self.writer.flush()
    }
}

/// Keeps every fragment in memory, in arrival order.
#[derive(Debug, Default, Clone)]
pub struct BufferSink {
    fragments: Vec<String>,
}

impl BufferSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fragments received so far.
    pub fn fragments(&self) -> &[String] {
        &self.fragments
    }

    /// All fragments joined in order.
    pub fn concat(&self) -> String {
        self.fragments.concat()
    }
}

impl FragmentSink for BufferSink {
    fn on_fragment(&mut self, fragment: &str) -> io::Result<()> {
        self.fragments.push(fragment.to_owned());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingWriter;

    impl Write for FailingWriter {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::from(io::ErrorKind::BrokenPipe))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn writer_sink_writes_through() {
        let mut sink = WriterSink::new(Vec::new());
        sink.on_fragment("The sky ").unwrap();
        sink.on_fragment("is blue.").unwrap();
        assert_eq!(sink.into_inner(), b"The sky is blue.");
    }

    #[test]
    fn writer_errors_surface() {
        let mut sink = WriterSink::new(FailingWriter);
        let err = sink.on_fragment("x").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn buffer_keeps_order() {
        let mut sink = BufferSink::new();
        for piece in ["4", "", "2"] {
            sink.on_fragment(piece).unwrap();
        }
        assert_eq!(sink.fragments(), ["4", "", "2"]);
        assert_eq!(sink.concat(), "42");
    }
}
