// codec/patch.rs
// RDF Patch text codec
//
// One physical commit is written as one or more sections:
//
// ```text
// H userCommitMessage "Fix title" .
// H timestamp "2024-03-01T10:15:30.250Z"^^<http://www.w3.org/2001/XMLSchema#dateTime> .
// TX .
// A <http://example.com/s> <http://example.com/p> "v"@en <http://example.com/g> .
// D _:b0 <http://example.com/p> "1"^^<http://www.w3.org/2001/XMLSchema#int> .
// TC .
// ```

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::{QuadLogError, Result};
use crate::listener::TransactionListener;
use crate::quad::{Node, Quad, XSD_DATE_TIME};
use crate::record::CommitMetadata;

const USER_COMMIT_MESSAGE_FIELD: &str = "userCommitMessage";
const SYSTEM_COMMIT_MESSAGE_FIELD: &str = "systemCommitMessage";
const USER_ID_FIELD: &str = "userId";
const USER_NAME_FIELD: &str = "userName";
const TIMESTAMP_FIELD: &str = "timestamp";

#[derive(Debug, Default)]
pub struct PatchEncoder {
    out: String,
    in_section: bool,
    aborted: bool,
}

impl PatchEncoder {
    pub fn new() -> Self {
        PatchEncoder::default()
    }

    pub fn finish(self) -> Result<Vec<u8>> {
        if self.aborted {
            return Ok(Vec::new());
        }
        Ok(self.out.into_bytes())
    }

    fn header_string(&mut self, field: &str, value: &Option<String>) {
        if let Some(value) = value {
            self.out.push_str("H ");
            self.out.push_str(field);
            self.out.push(' ');
            write_string_literal(&mut self.out, value);
            self.out.push_str(" .\n");
        }
    }

    fn row(&mut self, code: &str, quad: &Quad) -> Result<()> {
        if !self.in_section {
            return Err(QuadLogError::Codec(format!("{} row before metadata", code)));
        }
        self.out.push_str(code);
        for node in [&quad.subject, &quad.predicate, &quad.object] {
            self.out.push(' ');
            write_node(&mut self.out, node)?;
        }
        if !quad.graph.is_default_graph() {
            self.out.push(' ');
            write_node(&mut self.out, &quad.graph)?;
        }
        self.out.push_str(" .\n");
        Ok(())
    }
}

impl TransactionListener for PatchEncoder {
    fn on_begin(&mut self) -> Result<()> {
        self.out.clear();
        self.in_section = false;
        self.aborted = false;
        Ok(())
    }

    fn on_metadata(&mut self, metadata: &CommitMetadata) -> Result<()> {
        if self.in_section {
            self.out.push_str("TC .\n");
        }
        self.header_string(USER_COMMIT_MESSAGE_FIELD, &metadata.user_message);
        self.header_string(SYSTEM_COMMIT_MESSAGE_FIELD, &metadata.system_message);
        self.header_string(USER_ID_FIELD, &metadata.user_id);
        self.header_string(USER_NAME_FIELD, &metadata.user_name);

        let timestamp = format_timestamp(metadata.timestamp)?;
        self.out.push_str("H ");
        self.out.push_str(TIMESTAMP_FIELD);
        self.out.push(' ');
        write_node(&mut self.out, &Node::typed_literal(timestamp, XSD_DATE_TIME))?;
        self.out.push_str(" .\n");

        self.out.push_str("TX .\n");
        self.in_section = true;
        Ok(())
    }

    fn on_add(&mut self, quad: &Quad) -> Result<()> {
        self.row("A", quad)
    }

    fn on_delete(&mut self, quad: &Quad) -> Result<()> {
        self.row("D", quad)
    }

    fn on_commit(&mut self) -> Result<()> {
        if self.in_section {
            self.out.push_str("TC .\n");
            self.in_section = false;
        }
        Ok(())
    }

    fn on_abort(&mut self) -> Result<()> {
        self.out.clear();
        self.in_section = false;
        self.aborted = true;
        Ok(())
    }
}

fn write_node(out: &mut String, node: &Node) -> Result<()> {
    match node {
        Node::Iri(iri) => write_iri(out, iri)?,
        Node::Blank(label) => {
            if label.is_empty() || label.chars().any(|c| c.is_whitespace() || c.is_control()) {
                return Err(QuadLogError::Codec(format!(
                    "blank node label {:?} can't be written",
                    label
                )));
            }
            out.push_str("_:");
            out.push_str(label);
        }
        Node::Literal {
            lexical,
            datatype,
            language,
        } => {
            if language.is_some() && datatype.is_some() {
                return Err(QuadLogError::Codec(format!(
                    "literal {:?} has both a language tag and a datatype",
                    lexical
                )));
            }
            write_string_literal(out, lexical);
            if let Some(lang) = language {
                if lang.is_empty() || !lang.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
                    return Err(QuadLogError::Codec(format!("invalid language tag {:?}", lang)));
                }
                out.push('@');
                out.push_str(lang);
            } else if let Some(dt) = datatype {
                out.push_str("^^");
                write_iri(out, dt)?;
            }
        }
    }
    Ok(())
}

fn write_iri(out: &mut String, iri: &str) -> Result<()> {
    out.push('<');
    for c in iri.chars() {
        match c {
            '<' | '>' | '"' | '{' | '}' | '|' | '^' | '`' | '\\' => push_uchar(out, c),
            c if (c as u32) <= 0x20 => push_uchar(out, c),
            c => out.push(c),
        }
    }
    out.push('>');
    Ok(())
}

fn write_string_literal(out: &mut String, value: &str) {
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => push_uchar(out, c),
            c => out.push(c),
        }
    }
    out.push('"');
}

fn push_uchar(out: &mut String, c: char) {
    let code = c as u32;
    if code <= 0xFFFF {
        out.push_str(&format!("\\u{:04X}", code));
    } else {
        out.push_str(&format!("\\U{:08X}", code));
    }
}

/// Cursor over one row of patch text
struct RowParser<'a> {
    row: &'a str,
    pos: usize,
    line: usize,
}

impl<'a> RowParser<'a> {
    fn new(row: &'a str, line: usize) -> Self {
        RowParser { row, pos: 0, line }
    }

    fn error(&self, msg: impl std::fmt::Display) -> QuadLogError {
        QuadLogError::Codec(format!("line {}: {}", self.line, msg))
    }

    fn rest(&self) -> &'a str {
        &self.row[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(c) if c == ' ' || c == '\t') {
            self.bump();
        }
    }

    fn word(&mut self) -> Result<&'a str> {
        self.skip_ws();
        let start = self.pos;
        while matches!(self.peek(), Some(c) if !c.is_whitespace()) {
            self.bump();
        }
        if start == self.pos {
            return Err(self.error("expected a word"));
        }
        Ok(&self.row[start..self.pos])
    }

    /// True if the next token is the terminating `.`
    fn at_dot(&mut self) -> bool {
        self.skip_ws();
        self.rest() == "." || self.rest().starts_with(". ") || self.rest().starts_with(".\t")
    }

    fn expect_end(&mut self) -> Result<()> {
        if !self.at_dot() {
            return Err(self.error("expected ' .'"));
        }
        self.bump();
        self.skip_ws();
        if !self.rest().is_empty() {
            return Err(self.error("unexpected text after ' .'"));
        }
        Ok(())
    }

    fn node(&mut self) -> Result<Node> {
        self.skip_ws();
        match self.peek() {
            Some('<') => Ok(Node::Iri(self.iri()?)),
            Some('_') => {
                if !self.rest().starts_with("_:") {
                    return Err(self.error("expected '_:'"));
                }
                self.pos += 2;
                let start = self.pos;
                while matches!(self.peek(), Some(c) if !c.is_whitespace()) {
                    self.bump();
                }
                if start == self.pos {
                    return Err(self.error("empty blank node label"));
                }
                Ok(Node::Blank(self.row[start..self.pos].to_string()))
            }
            Some('"') => self.literal(),
            Some(c) => Err(self.error(format!("unexpected character {:?}", c))),
            None => Err(self.error("expected a term")),
        }
    }

    fn iri(&mut self) -> Result<String> {
        self.bump(); // '<'
        let mut iri = String::new();
        loop {
            match self.bump() {
                Some('>') => return Ok(iri),
                Some('\\') => iri.push(self.uchar_escape()?),
                Some(c) => iri.push(c),
                None => return Err(self.error("unterminated IRI")),
            }
        }
    }

    fn literal(&mut self) -> Result<Node> {
        self.bump(); // '"'
        let mut lexical = String::new();
        loop {
            match self.bump() {
                Some('"') => break,
                Some('\\') => {
                    let c = match self.peek() {
                        Some('u') | Some('U') => self.uchar_escape()?,
                        Some(e) => {
                            self.bump();
                            match e {
                                'n' => '\n',
                                'r' => '\r',
                                't' => '\t',
                                'b' => '\u{8}',
                                'f' => '\u{c}',
                                '"' => '"',
                                '\'' => '\'',
                                '\\' => '\\',
                                other => return Err(self.error(format!("unknown escape \\{}", other))),
                            }
                        }
                        None => return Err(self.error("dangling escape")),
                    };
                    lexical.push(c);
                }
                Some(c) => lexical.push(c),
                None => return Err(self.error("unterminated literal")),
            }
        }

        if self.rest().starts_with('@') {
            self.bump();
            let start = self.pos;
            while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == '-') {
                self.bump();
            }
            if start == self.pos {
                return Err(self.error("empty language tag"));
            }
            let lang = self.row[start..self.pos].to_string();
            return Ok(Node::lang_literal(lexical, lang));
        }
        if self.rest().starts_with("^^") {
            self.pos += 2;
            if self.peek() != Some('<') {
                return Err(self.error("expected datatype IRI"));
            }
            let datatype = self.iri()?;
            return Ok(Node::typed_literal(lexical, datatype));
        }
        Ok(Node::literal(lexical))
    }

    /// Parse `uXXXX` / `UXXXXXXXX` after a backslash
    fn uchar_escape(&mut self) -> Result<char> {
        let digits = match self.bump() {
            Some('u') => 4,
            Some('U') => 8,
            _ => return Err(self.error("expected \\u or \\U escape")),
        };
        let rest = self.rest();
        if rest.len() < digits || !rest.is_char_boundary(digits) {
            return Err(self.error("short unicode escape"));
        }
        let hex = &rest[..digits];
        let code = u32::from_str_radix(hex, 16).map_err(|_| self.error("bad unicode escape"))?;
        self.pos += digits;
        char::from_u32(code).ok_or_else(|| self.error("invalid code point"))
    }

    fn quad(&mut self) -> Result<Quad> {
        let subject = self.node()?;
        let predicate = self.node()?;
        let object = self.node()?;
        let graph = if self.at_dot() {
            Node::default_graph()
        } else {
            self.node()?
        };
        self.expect_end()?;
        Ok(Quad::new(graph, subject, predicate, object))
    }
}

fn header_text(node: Node, field: &str) -> Result<String> {
    match node {
        Node::Literal { lexical, .. } => Ok(lexical),
        other => Err(QuadLogError::Codec(format!(
            "header {} must be a literal, got {}",
            field, other
        ))),
    }
}

/// `xsd:dateTime` text for epoch milliseconds
///
/// Only instants that read back to the same value are accepted; RFC 3339
/// has no form for years outside 0000-9999.
fn format_timestamp(millis: i64) -> Result<String> {
    let out_of_range = || QuadLogError::Codec(format!("timestamp {} out of range", millis));
    let text = DateTime::<Utc>::from_timestamp_millis(millis)
        .ok_or_else(out_of_range)?
        .to_rfc3339_opts(SecondsFormat::Millis, true);
    match DateTime::parse_from_rfc3339(&text) {
        Ok(parsed) if parsed.timestamp_millis() == millis => Ok(text),
        _ => Err(out_of_range()),
    }
}

fn header_timestamp(node: Node) -> Result<i64> {
    let text = header_text(node, TIMESTAMP_FIELD)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|dt| dt.timestamp_millis())
        .map_err(|e| QuadLogError::Codec(format!("bad timestamp {:?}: {}", text, e)))
}

pub(crate) fn decode(data: &[u8], listener: &mut dyn TransactionListener) -> Result<()> {
    let text = std::str::from_utf8(data)
        .map_err(|e| QuadLogError::Codec(format!("patch is not UTF-8: {}", e)))?;
    if text.is_empty() {
        return Err(QuadLogError::Truncated("empty patch".to_string()));
    }
    if !text.ends_with('\n') {
        return Err(QuadLogError::Truncated("patch ends mid-row".to_string()));
    }

    listener.on_begin()?;

    let mut headers = CommitMetadata::default();
    let mut in_section = false;
    let mut sections = 0usize;
    // H rows read since the last TX
    let mut open_headers = false;

    for (idx, raw) in text.lines().enumerate() {
        let row = raw.trim();
        if row.is_empty() || row.starts_with('#') {
            continue;
        }
        let mut parser = RowParser::new(row, idx + 1);
        let code = parser.word()?;

        match code {
            "H" => {
                if in_section {
                    return Err(parser.error("header inside a transaction"));
                }
                let field = parser.word()?;
                let value = parser.node()?;
                parser.expect_end()?;
                open_headers = true;
                match field {
                    USER_COMMIT_MESSAGE_FIELD => headers.user_message = Some(header_text(value, field)?),
                    SYSTEM_COMMIT_MESSAGE_FIELD => headers.system_message = Some(header_text(value, field)?),
                    USER_ID_FIELD => headers.user_id = Some(header_text(value, field)?),
                    USER_NAME_FIELD => headers.user_name = Some(header_text(value, field)?),
                    TIMESTAMP_FIELD => headers.timestamp = header_timestamp(value)?,
                    _ => {}
                }
            }
            "TX" => {
                parser.expect_end()?;
                if in_section {
                    return Err(parser.error("nested TX"));
                }
                listener.on_metadata(&std::mem::take(&mut headers))?;
                in_section = true;
                open_headers = false;
            }
            "A" | "D" => {
                if !in_section {
                    return Err(parser.error("change row outside a transaction"));
                }
                let quad = parser.quad()?;
                if code == "A" {
                    listener.on_add(&quad)?;
                } else {
                    listener.on_delete(&quad)?;
                }
            }
            "TC" => {
                parser.expect_end()?;
                if !in_section {
                    return Err(parser.error("TC without TX"));
                }
                in_section = false;
                sections += 1;
            }
            "TA" => {
                parser.expect_end()?;
                return listener.on_abort();
            }
            "PA" | "PD" => return Err(parser.error("prefix rows are not supported")),
            other => return Err(parser.error(format!("unknown row code {:?}", other))),
        }
    }

    if in_section || sections == 0 {
        return Err(QuadLogError::Truncated("missing final TC".to_string()));
    }
    if open_headers {
        return Err(QuadLogError::Truncated("headers without a TX".to_string()));
    }
    listener.on_commit()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::{emit_records, RecordCollector};
    use crate::record::CommitRecord;

    fn decode_records(text: &str) -> Result<Vec<CommitRecord>> {
        let mut collector = RecordCollector::new();
        decode(text.as_bytes(), &mut collector)?;
        Ok(collector.into_records())
    }

    #[test]
    fn test_writes_rdf_patch_rows() {
        let mut record = CommitRecord::default();
        record.metadata.user_message = Some("say \"hi\"".to_string());
        record.metadata.timestamp = 1_709_288_130_250;
        record.added.insert(Quad::new(
            Node::iri("http://example.com/g"),
            Node::iri("http://example.com/s"),
            Node::iri("http://example.com/p"),
            Node::lang_literal("v", "en"),
        ));
        record.removed.insert(Quad::triple(
            Node::blank("b0"),
            Node::iri("http://example.com/p"),
            Node::typed_literal("1", "http://www.w3.org/2001/XMLSchema#int"),
        ));

        let mut encoder = PatchEncoder::new();
        emit_records(&[record], &mut encoder).unwrap();
        let text = String::from_utf8(encoder.finish().unwrap()).unwrap();

        let expected = "H userCommitMessage \"say \\\"hi\\\"\" .\n\
            H timestamp \"2024-03-01T10:15:30.250Z\"^^<http://www.w3.org/2001/XMLSchema#dateTime> .\n\
            TX .\n\
            A <http://example.com/s> <http://example.com/p> \"v\"@en <http://example.com/g> .\n\
            D _:b0 <http://example.com/p> \"1\"^^<http://www.w3.org/2001/XMLSchema#int> .\n\
            TC .\n";
        assert_eq!(text, expected);
    }

    #[test]
    fn test_reads_hand_written_patch() {
        let text = "# comment\n\
            H userId \"u1\" .\n\
            H timestamp \"1970-01-01T00:00:01Z\"^^<http://www.w3.org/2001/XMLSchema#dateTime> .\n\
            H unknownField \"ignored\" .\n\
            TX .\n\
            A <s> <p> \"caf\\u00E9\" .\n\
            TC .\n";
        let records = decode_records(text).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].metadata.user_id.as_deref(), Some("u1"));
        assert_eq!(records[0].metadata.timestamp, 1000);
        let quad = records[0].added.iter().next().unwrap();
        assert_eq!(quad.object, Node::literal("café"));
        assert!(quad.graph.is_default_graph());
    }

    #[test]
    fn test_iri_escapes_round_trip() {
        let quad = Quad::triple(
            Node::iri("http://example.com/a b>c"),
            Node::iri("http://example.com/p"),
            Node::iri("http://example.com/\u{1F600}"),
        );
        let mut record = CommitRecord::default();
        record.added.insert(quad);

        let mut encoder = PatchEncoder::new();
        emit_records(std::slice::from_ref(&record), &mut encoder).unwrap();
        let bytes = encoder.finish().unwrap();
        assert_eq!(decode_records(std::str::from_utf8(&bytes).unwrap()).unwrap(), vec![record]);
    }

    #[test]
    fn test_missing_final_tc_is_truncation() {
        let text = "H timestamp \"1970-01-01T00:00:00Z\"^^<http://www.w3.org/2001/XMLSchema#dateTime> .\nTX .\nA <s> <p> <o> .\n";
        assert!(matches!(decode_records(text), Err(QuadLogError::Truncated(_))));
        assert!(matches!(decode_records("TX .\nA <s> <p"), Err(QuadLogError::Truncated(_))));
    }

    #[test]
    fn test_malformed_rows_fail() {
        assert!(matches!(decode_records("TX .\nQ <s> .\nTC .\n"), Err(QuadLogError::Codec(_))));
        assert!(matches!(decode_records("A <s> <p> <o> .\n"), Err(QuadLogError::Codec(_))));
        assert!(matches!(decode_records("PA ex <http://example.com/> .\n"), Err(QuadLogError::Codec(_))));
        assert!(matches!(decode_records("TX .\nA <s> <p> \"x .\nTC .\n"), Err(QuadLogError::Codec(_))));
    }

    #[test]
    fn test_every_cut_inside_a_section_is_truncation() {
        let records: Vec<CommitRecord> = ["one", "two"]
            .iter()
            .map(|name| {
                let mut record = CommitRecord::default();
                record.metadata.user_message = Some(name.to_string());
                record.added.insert(Quad::triple(
                    Node::iri(format!("http://example.com/{}", name)),
                    Node::iri("http://example.com/p"),
                    Node::literal(*name),
                ));
                record
            })
            .collect();
        let mut encoder = PatchEncoder::new();
        emit_records(&records, &mut encoder).unwrap();
        let text = String::from_utf8(encoder.finish().unwrap()).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        for cut in 0..lines.len() {
            let prefix: String = lines[..cut].iter().map(|l| format!("{}\n", l)).collect();
            let result = decode_records(&prefix);
            if cut > 0 && lines[cut - 1] == "TC ." {
                // A cut between sections is a shorter valid patch
                assert_eq!(result.unwrap(), records[..1].to_vec(), "cut at line {}", cut);
            } else {
                assert!(
                    matches!(result, Err(QuadLogError::Truncated(_))),
                    "cut at line {} decoded: {:?}",
                    cut,
                    result
                );
            }
        }
        assert_eq!(decode_records(&text).unwrap(), records);
    }

    #[test]
    fn test_trailing_headers_are_truncation() {
        let text = "TX .\nTC .\nH userCommitMessage \"two\" .\n";
        assert!(matches!(decode_records(text), Err(QuadLogError::Truncated(_))));
    }

    #[test]
    fn test_timestamp_range_is_checked_on_write() {
        let encode = |timestamp: i64| {
            let mut record = CommitRecord::default();
            record.metadata.timestamp = timestamp;
            let mut encoder = PatchEncoder::new();
            emit_records(std::slice::from_ref(&record), &mut encoder)
                .and_then(|()| encoder.finish())
                .map(|bytes| (record, bytes))
        };

        // 9999-12-31T23:59:59.999Z is the last instant RFC 3339 can express
        let (record, bytes) = encode(253_402_300_799_999).unwrap();
        assert_eq!(decode_records(std::str::from_utf8(&bytes).unwrap()).unwrap(), vec![record]);

        assert!(matches!(encode(253_402_300_800_000), Err(QuadLogError::Codec(_))));
        assert!(matches!(encode(-62_167_219_200_001), Err(QuadLogError::Codec(_))));
        assert!(matches!(encode(i64::MAX), Err(QuadLogError::Codec(_))));
    }

    #[test]
    fn test_literal_with_language_and_datatype_is_rejected_on_write() {
        let mut encoder = PatchEncoder::new();
        encoder.on_begin().unwrap();
        encoder.on_metadata(&CommitMetadata::default()).unwrap();
        let object = Node::Literal {
            lexical: "v".to_string(),
            datatype: Some("http://www.w3.org/2001/XMLSchema#string".to_string()),
            language: Some("en".to_string()),
        };
        let quad = Quad::triple(Node::iri("s"), Node::iri("p"), object);
        assert!(matches!(encoder.on_add(&quad), Err(QuadLogError::Codec(_))));
    }

    #[test]
    fn test_invalid_blank_label_is_rejected_on_write() {
        let mut encoder = PatchEncoder::new();
        encoder.on_begin().unwrap();
        encoder.on_metadata(&CommitMetadata::default()).unwrap();
        let quad = Quad::triple(Node::blank("a b"), Node::iri("p"), Node::iri("o"));
        assert!(encoder.on_add(&quad).is_err());
    }
}
