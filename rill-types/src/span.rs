use std::{fmt, path::PathBuf, sync::Arc};

/// A byte range into a shared source string, with the path the source was
/// loaded from, if any.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Span {
    src: Arc<str>,
    start: usize,
    end: usize,
    path: Option<Arc<PathBuf>>,
}

impl Span {
    pub fn new(src: Arc<str>, start: usize, end: usize, path: Option<Arc<PathBuf>>) -> Option<Span> {
        if src.get(start..end).is_none() {
            return None;
        }
        Some(Span {
            src,
            start,
            end,
            path,
        })
    }

    /// A span covering the entire source.
    pub fn from_string(src: Arc<str>, path: Option<Arc<PathBuf>>) -> Span {
        let end = src.len();
        Span {
            src,
            start: 0,
            end,
            path,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.src[self.start..self.end]
    }

    pub fn join(lhs: &Span, rhs: &Span) -> Span {
        assert!(Arc::ptr_eq(&lhs.src, &rhs.src));
        assert_eq!(lhs.path, rhs.path);
        Span {
            src: lhs.src.clone(),
            start: lhs.start,
            end: rhs.end,
            path: lhs.path.clone(),
        }
    }

    pub fn src(&self) -> &Arc<str> {
        &self.src
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> usize {
        self.end
    }

    pub fn path(&self) -> Option<&Arc<PathBuf>> {
        self.path.as_ref()
    }

    /// 1-indexed line and column of the start of this span.
    pub fn line_col(&self) -> (usize, usize) {
        let before = &self.src[..self.start.min(self.src.len())];
        let line = before.bytes().filter(|&b| b == b'\n').count() + 1;
        let col = before
            .rfind('\n')
            .map(|pos| self.start - pos)
            .unwrap_or(self.start + 1);
        (line, col)
    }
}

impl fmt::Debug for Span {
    fn fmt(&self, fmt: &mut fmt::Formatter) -> fmt::Result {
        fmt.debug_struct("Span")
            .field("start", &self.start)
            .field("end", &self.end)
            .field("as_str", &self.as_str())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_range_span_is_rejected() {
        let src: Arc<str> = Arc::from("let x = 1;");
        assert!(Span::new(src.clone(), 0, 99, None).is_none());
        assert!(Span::new(src, 4, 5, None).is_some());
    }

    #[test]
    fn line_col_counts_newlines() {
        let src: Arc<str> = Arc::from("out 1;\nout 2;\n");
        let span = Span::new(src, 7, 10, None).unwrap();
        assert_eq!(span.as_str(), "out");
        assert_eq!(span.line_col(), (2, 1));
    }
}
