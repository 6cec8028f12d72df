//! Pretty printing utilities for loop trees and lowered statements.

/// A value printed as indented, multi-line text.
pub trait PrettyPrint {
    /// Write the value into a formatter at its current indentation.
    fn pretty_into(&self, f: &mut CodeFormatter);

    /// Print with the default two-space indent.
    fn pretty(&self) -> String {
        let mut f = CodeFormatter::default_indent();
        self.pretty_into(&mut f);
        f.finish()
    }
}

/// Line-oriented writer that tracks nesting depth.
#[derive(Debug)]
pub struct CodeFormatter {
    output: String,
    depth: usize,
    unit: String,
    at_line_start: bool,
}

impl CodeFormatter {
    /// Create a formatter indenting each level by `unit`.
    pub fn new(unit: &str) -> Self {
        Self {
            output: String::new(),
            depth: 0,
            unit: unit.to_string(),
            at_line_start: true,
        }
    }

    /// Two spaces per level.
    pub fn default_indent() -> Self {
        Self::new("  ")
    }

    /// One level deeper.
    pub fn indent(&mut self) {
        self.depth += 1;
    }

    /// One level shallower; stays at zero.
    pub fn dedent(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    /// Write text; the indent is emitted at the start of every line.
    pub fn write(&mut self, s: &str) {
        for (k, line) in s.split('\n').enumerate() {
            if k > 0 {
                self.output.push('\n');
                self.at_line_start = true;
            }
            if line.is_empty() {
                continue;
            }
            if self.at_line_start {
                self.output.push_str(&self.unit.repeat(self.depth));
                self.at_line_start = false;
            }
            self.output.push_str(line);
        }
    }

    /// Write a full line.
    pub fn writeln(&mut self, s: &str) {
        self.write(s);
        self.write("\n");
    }

    /// `header {`, the body one level deeper, then `}`.
    pub fn block<F: FnOnce(&mut Self)>(&mut self, header: &str, body: F) {
        self.write(header);
        self.writeln(" {");
        self.indent();
        body(self);
        self.dedent();
        self.writeln("}");
    }

    /// The text written so far.
    pub fn finish(self) -> String {
        self.output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_blocks() {
        let mut f = CodeFormatter::default_indent();
        f.block("for (c1, 0, N)", |f| {
            f.block("for (c3, 0, M)", |f| f.writeln("A[c3] = 0"));
            f.writeln("B[c1] = 1");
        });
        assert_eq!(f.finish(), "for (c1, 0, N) {\n  for (c3, 0, M) {\n    A[c3] = 0\n  }\n  B[c1] = 1\n}\n");
    }

    #[test]
    fn test_multiline_write_indents_each_line() {
        let mut f = CodeFormatter::new("\t");
        f.indent();
        f.writeln("a\nb");
        f.dedent();
        f.dedent();
        f.writeln("c");
        assert_eq!(f.finish(), "\ta\n\tb\nc\n");
    }
}
