//! Line parser for the scanner's text output
//!
//! The scanner prints one `<frequency> <power>` pair per line. A blank line
//! closes a scan, two blank lines in a row close a sweep, and lines starting
//! with `#` are header comments.

/// One power reading emitted by the scanner
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Readout {
    /// Frequency in Hz
    pub frequency: f64,

    /// Power spectral density in dB/Hz (arbitrary reference)
    pub power: f64,
}

/// Readouts from one tuner hop
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Scan {
    pub readouts: Vec<Readout>,
    pub is_first_of_sweep: bool,
    pub is_last_of_sweep: bool,
}

/// Classification of a single output line
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LineKind {
    Comment,
    Boundary,
    /// A readout and whether both fields parsed
    Data(Readout, bool),
}

/// Classify one line (without its trailing newline)
///
/// Data lines are parsed leniently: a field that fails to parse reads as 0,
/// and once the frequency fails the power is not read either.
pub fn classify_line(line: &str) -> LineKind {
    if line.starts_with('#') {
        return LineKind::Comment;
    }
    if line.trim().is_empty() {
        return LineKind::Boundary;
    }

    let mut fields = line.split_whitespace();
    let frequency = fields.next().and_then(|f| f.parse::<f64>().ok());
    let power = frequency.and(fields.next().and_then(|p| p.parse::<f64>().ok()));

    let readout = Readout {
        frequency: frequency.unwrap_or(0.0),
        power: power.unwrap_or(0.0),
    };
    LineKind::Data(readout, frequency.is_some() && power.is_some())
}

/// Stateful parser turning scanner output into scans
///
/// Readouts accumulate in a back buffer. The buffer is handed out as a
/// finished [`Scan`] when data resumes after a boundary, or immediately when
/// a second consecutive boundary ends the sweep.
#[derive(Debug)]
pub struct LineParser {
    partial: Vec<u8>,
    back: Scan,
    boundary_seen: bool,
    next_is_first: bool,
    malformed: u64,
}

impl Default for LineParser {
    fn default() -> Self {
        Self::new()
    }
}

impl LineParser {
    /// Create a parser for a fresh scanner process
    ///
    /// The scanner always starts at the bottom of the range, so the first
    /// scan produced is the first of a sweep.
    pub fn new() -> Self {
        Self {
            partial: Vec::with_capacity(128),
            back: Scan::default(),
            boundary_seen: false,
            next_is_first: true,
            malformed: 0,
        }
    }

    /// Process one line
    ///
    /// # Returns
    /// The scan completed by this line, if any
    pub fn process_line(&mut self, line: &str) -> Option<Scan> {
        let line = line.trim_end_matches(|c: char| c == '\n' || c == '\r');

        match classify_line(line) {
            LineKind::Comment => None,
            LineKind::Boundary => {
                if self.boundary_seen {
                    self.back.is_last_of_sweep = true;
                    self.take_scan()
                } else {
                    self.boundary_seen = true;
                    None
                }
            }
            LineKind::Data(readout, well_formed) => {
                if !well_formed {
                    self.malformed += 1;
                    log::debug!("Malformed scanner line read as zeros: {:?}", line);
                }

                let completed = if self.boundary_seen {
                    self.boundary_seen = false;
                    self.take_scan()
                } else {
                    None
                };

                self.back.readouts.push(readout);
                completed
            }
        }
    }

    /// Feed raw output bytes, splitting them into lines
    ///
    /// Incomplete trailing bytes are kept until the next call.
    ///
    /// # Arguments
    /// * `bytes` - Bytes read from the scanner's stdout
    /// * `publish` - Called with every scan completed by these bytes
    pub fn feed<F: FnMut(Scan)>(&mut self, bytes: &[u8], mut publish: F) {
        for &byte in bytes {
            if byte != b'\n' {
                self.partial.push(byte);
                continue;
            }

            let line = std::mem::take(&mut self.partial);
            let completed = self.process_line(&String::from_utf8_lossy(&line));
            self.partial = line;
            self.partial.clear();

            if let Some(scan) = completed {
                publish(scan);
            }
        }
    }

    /// Flush state once the output stream has closed
    ///
    /// An unterminated last line is processed and a partially filled scan is
    /// published. The parser is then ready for a new process.
    pub fn finish<F: FnMut(Scan)>(&mut self, mut publish: F) {
        if !self.partial.is_empty() {
            let line = std::mem::take(&mut self.partial);
            if let Some(scan) = self.process_line(&String::from_utf8_lossy(&line)) {
                publish(scan);
            }
        }

        if let Some(scan) = self.take_scan() {
            publish(scan);
        }

        self.boundary_seen = false;
        self.next_is_first = true;
    }

    /// Number of data lines that did not parse as two numbers
    pub fn malformed_lines(&self) -> u64 {
        self.malformed
    }

    fn take_scan(&mut self) -> Option<Scan> {
        if self.back.readouts.is_empty() {
            self.back.is_last_of_sweep = false;
            return None;
        }

        let mut scan = std::mem::take(&mut self.back);
        scan.is_first_of_sweep = self.next_is_first;
        self.next_is_first = scan.is_last_of_sweep;
        Some(scan)
    }
}
