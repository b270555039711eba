// This file is part of Nitrogen.
//
// Nitrogen is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// Nitrogen is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with Nitrogen.  If not, see <http://www.gnu.org/licenses/>.
//! Tab separated catalog tiles, optionally gzip compressed.

use anyhow::Result;
use flate2::{read::GzDecoder, write::GzEncoder, Compression};
use std::{
    fmt,
    fs::File,
    io::{BufRead, BufReader, Cursor, Read, Write},
    path::Path,
};

const GZIP_MAGIC: [u8; 2] = [0x1F, 0x8B];

pub fn is_gzip(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[..2] == GZIP_MAGIC
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Table {
    header: Vec<String>,
    rows: Vec<Vec<String>>,
    delimiter: char,
}

impl Default for Table {
    fn default() -> Self {
        Self {
            header: Vec::new(),
            rows: Vec::new(),
            delimiter: '\t',
        }
    }
}

impl Table {
    pub fn new(header: Vec<String>) -> Self {
        Self {
            header,
            ..Default::default()
        }
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn delimiter(&self) -> char {
        self.delimiter
    }

    pub fn push_row(&mut self, row: Vec<String>) {
        self.rows.push(row);
    }

    /// Load from a file; `.csv` files switch the delimiter to a comma.
    pub fn load_path(path: &Path, delimiter: char) -> Result<Self> {
        let is_csv = path
            .extension()
            .map(|ext| ext.to_string_lossy().eq_ignore_ascii_case("csv"))
            .unwrap_or(false);
        let mut bytes = Vec::new();
        File::open(path)?.read_to_end(&mut bytes)?;
        Self::load(&bytes, if is_csv { ',' } else { delimiter })
    }

    /// The first line not starting with `#` is the header. Later `#` lines
    /// are skipped, and the first row with fewer than two fields ends the
    /// table.
    pub fn load(bytes: &[u8], delimiter: char) -> Result<Self> {
        let reader: Box<dyn BufRead + '_> = if is_gzip(bytes) {
            Box::new(BufReader::new(GzDecoder::new(Cursor::new(bytes))))
        } else {
            Box::new(Cursor::new(bytes))
        };

        let mut table = Table {
            delimiter,
            ..Default::default()
        };
        let mut have_header = false;
        for line in reader.lines() {
            let line = line?;
            let line = line.trim_end_matches('\r');
            if line.starts_with('#') {
                continue;
            }
            if !have_header {
                table.header = split_line(line, delimiter);
                have_header = true;
                continue;
            }
            let row = split_line(line, delimiter);
            if row.len() < 2 {
                break;
            }
            table.rows.push(row);
        }
        Ok(table)
    }

    /// Merge text into this table. Without `is_update` the table is replaced
    /// and the header re-read; a header without tabs but with commas switches
    /// the delimiter. With `purge` the existing rows are dropped.
    pub fn load_from_string(&mut self, data: &str, is_update: bool, purge: bool, has_header: bool) {
        let mut lines = data.lines().map(|l| l.trim_end_matches('\r'));
        if !is_update || has_header {
            match lines.next() {
                Some(header) => {
                    if !header.contains('\t') && header.contains(',') {
                        self.delimiter = ',';
                    }
                    if !is_update {
                        self.rows.clear();
                    }
                    self.header = split_line(header, self.delimiter);
                }
                None => self.header.clear(),
            }
        }
        if purge {
            self.rows.clear();
        }
        for line in lines {
            let row = split_line(line, self.delimiter);
            if row.is_empty() {
                break;
            }
            self.rows.push(row);
        }
    }

    /// Add rows from text; stops at the first row with fewer than two fields.
    pub fn append(&mut self, data: &str) {
        for line in data.lines() {
            let row = split_line(line.trim_end_matches('\r'), self.delimiter);
            if row.len() < 2 {
                break;
            }
            self.rows.push(row);
        }
    }

    /// Write as gzip compressed utf-8.
    pub fn save<W: Write>(&self, out: W) -> Result<()> {
        let mut encoder = GzEncoder::new(out, Compression::default());
        encoder.write_all(self.to_string().as_bytes())?;
        encoder.finish()?;
        Ok(())
    }

    pub fn to_gzip_bytes(&self) -> Result<Vec<u8>> {
        let mut out = Vec::new();
        self.save(&mut out)?;
        Ok(out)
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\r\n", self.header.join("\t"))?;
        for row in &self.rows {
            write!(f, "{}\r\n", row.join("\t"))?;
        }
        Ok(())
    }
}

/// Split on the delimiter, honoring double quoted fields with `""` escapes.
/// An empty line has no fields.
pub fn split_line(line: &str, delimiter: char) -> Vec<String> {
    if line.is_empty() {
        return Vec::new();
    }
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        if in_quotes {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    field.push('"');
                    chars.next();
                } else {
                    in_quotes = false;
                }
            } else {
                field.push(c);
            }
        } else if c == '"' && field.is_empty() {
            in_quotes = true;
        } else if c == delimiter {
            fields.push(std::mem::take(&mut field));
        } else {
            field.push(c);
        }
    }
    fields.push(field);
    fields
}
