//! ClassBench filter and packet trace reader.
//!
//! A filter line looks like
//!
//! ```text
//! @192.168.0.0/16  10.0.0.0/8  1024 : 65535  80 : 80  0x06/0xFF
//! ```
//!
//! and becomes a 5-field rule: source address, destination address,
//! source port, destination port, protocol. Earlier lines get higher
//! priorities. Trace lines hold one whitespace-separated value per field;
//! trailing columns are ignored.
//!
//! Files ending in `.gz` are decompressed on the fly.

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::net::Ipv4Addr;
use std::path::Path;

use flate2::read::GzDecoder;
use ipnet::Ipv4Net;

use crate::rule::{Interval, Point, Rule};
use crate::{Error, Result};

/// Field count of a ClassBench 5-tuple.
pub const CLASSBENCH_DIM: usize = 5;

fn parse_error(line: usize, message: impl Into<String>) -> Error {
    Error::Parse {
        line,
        message: message.into(),
    }
}

/// Open `path`, decompressing when it ends in `.gz`.
fn open(path: &Path) -> Result<Box<dyn Read>> {
    let file = File::open(path)?;
    if path.extension().is_some_and(|ext| ext == "gz") {
        Ok(Box::new(GzDecoder::new(file)))
    } else {
        Ok(Box::new(file))
    }
}

/// Read a ClassBench filter file.
pub fn load_rules(path: &Path) -> Result<Vec<Rule>> {
    let rules = read_rules(open(path)?)?;
    log::info!("Loaded {} rules from {:?}", rules.len(), path);
    Ok(rules)
}

/// Read a packet trace with `dim` fields per packet.
pub fn load_packets(path: &Path, dim: usize) -> Result<Vec<Vec<Point>>> {
    let packets = read_packets(open(path)?, dim)?;
    log::info!("Loaded {} packets from {:?}", packets.len(), path);
    Ok(packets)
}

/// Parse ClassBench filters from a reader.
pub fn read_rules<R: Read>(reader: R) -> Result<Vec<Rule>> {
    let mut boxes = Vec::new();
    for (n, line) in BufReader::new(reader).lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        boxes.push(parse_filter(line, n + 1)?);
    }

    let count = boxes.len() as u32;
    boxes
        .into_iter()
        .enumerate()
        .map(|(i, ranges)| Rule::new(ranges, count - 1 - i as u32))
        .collect()
}

/// Parse one filter line into its five ranges.
fn parse_filter(line: &str, line_no: usize) -> Result<Vec<Interval>> {
    let body = line
        .strip_prefix('@')
        .ok_or_else(|| parse_error(line_no, "filter must start with '@'"))?;

    // Normalise "lo:hi", "lo : hi" and "lo :hi" to separate tokens
    let body = body.replace(':', " : ");
    let tokens: Vec<&str> = body.split_whitespace().collect();
    if tokens.len() < 9 {
        return Err(parse_error(
            line_no,
            format!("expected 9 tokens, found {}", tokens.len()),
        ));
    }

    Ok(vec![
        parse_prefix(tokens[0], line_no)?,
        parse_prefix(tokens[1], line_no)?,
        parse_port_range(&tokens[2..5], line_no)?,
        parse_port_range(&tokens[5..8], line_no)?,
        parse_protocol(tokens[8], line_no)?,
    ])
}

/// `a.b.c.d/len` to the address range it covers.
fn parse_prefix(token: &str, line_no: usize) -> Result<Interval> {
    let net: Ipv4Net = token
        .parse()
        .map_err(|e| parse_error(line_no, format!("bad prefix {:?}: {}", token, e)))?;
    Interval::new(u32::from(net.network()), u32::from(net.broadcast()))
}

/// `lo : hi`, already split into three tokens.
fn parse_port_range(tokens: &[&str], line_no: usize) -> Result<Interval> {
    if tokens[1] != ":" {
        return Err(parse_error(
            line_no,
            format!("expected ':' in port range, found {:?}", tokens[1]),
        ));
    }
    let bound = |token: &str| -> Result<Point> {
        token
            .parse::<u16>()
            .map(Point::from)
            .map_err(|e| parse_error(line_no, format!("bad port {:?}: {}", token, e)))
    };
    Interval::new(bound(tokens[0])?, bound(tokens[2])?)
        .map_err(|e| parse_error(line_no, e.to_string()))
}

/// `0xVV/0xMM`; anything but an exact mask matches every protocol.
fn parse_protocol(token: &str, line_no: usize) -> Result<Interval> {
    let (value, mask) = token
        .split_once('/')
        .ok_or_else(|| parse_error(line_no, format!("bad protocol {:?}", token)))?;
    let hex = |s: &str| -> Result<u8> {
        let digits = s
            .strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);
        u8::from_str_radix(digits, 16)
            .map_err(|e| parse_error(line_no, format!("bad protocol {:?}: {}", token, e)))
    };
    let value = hex(value)?;
    if hex(mask)? == 0xFF {
        Ok(Interval::point(Point::from(value)))
    } else {
        Ok(Interval::new(0, 255)?)
    }
}

/// Parse a packet trace from a reader.
pub fn read_packets<R: Read>(reader: R, dim: usize) -> Result<Vec<Vec<Point>>> {
    let mut packets = Vec::new();
    for (n, line) in BufReader::new(reader).lines().enumerate() {
        let line = line?;
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.is_empty() {
            continue;
        }
        if fields.len() < dim {
            return Err(parse_error(
                n + 1,
                format!("expected {} fields, found {}", dim, fields.len()),
            ));
        }
        let packet = fields[..dim]
            .iter()
            .map(|f| {
                f.parse::<Point>()
                    .map_err(|e| parse_error(n + 1, format!("bad value {:?}: {}", f, e)))
            })
            .collect::<Result<Vec<_>>>()?;
        packets.push(packet);
    }
    Ok(packets)
}

/// Format a 5-field rule back into ClassBench filter syntax.
///
/// Address ranges that are not prefixes are widened to the smallest
/// enclosing prefix.
pub fn format_rule(rule: &Rule) -> Option<String> {
    if rule.dim() != CLASSBENCH_DIM {
        return None;
    }
    let prefix = |range: Interval| -> String {
        let span = range.low() ^ range.high();
        let len = span.leading_zeros() as u8;
        let addr = Ipv4Addr::from(range.low());
        Ipv4Net::new(addr, len)
            .map(|net| net.trunc().to_string())
            .unwrap_or_else(|_| format!("{}/32", addr))
    };
    let protocol = rule.range(4);
    let protocol = if protocol.width() == 1 {
        format!("0x{:02X}/0xFF", protocol.low())
    } else {
        "0x00/0x00".to_string()
    };
    Some(format!(
        "@{}\t{}\t{} : {}\t{} : {}\t{}",
        prefix(rule.range(0)),
        prefix(rule.range(1)),
        rule.range(2).low(),
        rule.range(2).high(),
        rule.range(3).low(),
        rule.range(3).high(),
        protocol
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const FILTERS: &str = "\
@192.168.0.0/16\t10.0.0.0/8\t1024 : 65535\t80 : 80\t0x06/0xFF
@0.0.0.0/0\t10.1.2.3/32\t0 : 65535\t0 : 65535\t0x00/0x00\t0x0000/0x0200

@172.16.0.0/12 0.0.0.0/0 53:53 0 : 65535 0x11/0xFF
";

    #[test]
    fn test_read_rules() {
        let rules = read_rules(FILTERS.as_bytes()).unwrap();
        assert_eq!(rules.len(), 3);

        let first = &rules[0];
        assert_eq!(first.priority(), 2);
        assert_eq!(first.range(0), Interval::new(0xC0A8_0000, 0xC0A8_FFFF).unwrap());
        assert_eq!(first.range(1), Interval::new(0x0A00_0000, 0x0AFF_FFFF).unwrap());
        assert_eq!(first.range(2), Interval::new(1024, 65535).unwrap());
        assert_eq!(first.range(3), Interval::point(80));
        assert_eq!(first.range(4), Interval::point(6));

        let second = &rules[1];
        assert_eq!(second.priority(), 1);
        assert_eq!(second.range(0), Interval::full());
        assert_eq!(second.range(1), Interval::point(0x0A01_0203));
        assert_eq!(second.range(4), Interval::new(0, 255).unwrap());

        // Compact port syntax
        assert_eq!(rules[2].range(2), Interval::point(53));
        assert_eq!(rules[2].priority(), 0);
    }

    #[test]
    fn test_read_rules_reports_line() {
        let input = "@1.2.3.0/24 0.0.0.0/0 0 : 65535 0 : 65535 0x06/0xFF\n@1.2.3.0/40 0.0.0.0/0 0 : 1 0 : 1 0x06/0xFF\n";
        match read_rules(input.as_bytes()) {
            Err(Error::Parse { line, .. }) => assert_eq!(line, 2),
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_read_rules_rejects_inverted_ports() {
        let input = "@0.0.0.0/0 0.0.0.0/0 90 : 80 0 : 65535 0x06/0xFF\n";
        assert!(matches!(
            read_rules(input.as_bytes()),
            Err(Error::Parse { line: 1, .. })
        ));
    }

    #[test]
    fn test_read_packets() {
        let input = "3232235777\t167772161\t2000\t80\t6\t0\n\n1 2 3 4 5\n";
        let packets = read_packets(input.as_bytes(), 5).unwrap();
        assert_eq!(packets, vec![vec![3232235777, 167772161, 2000, 80, 6], vec![1, 2, 3, 4, 5]]);

        assert!(matches!(
            read_packets("1 2 3\n".as_bytes(), 5),
            Err(Error::Parse { line: 1, .. })
        ));
    }

    #[test]
    fn test_load_gzip_rules() {
        use flate2::write::GzEncoder;
        use flate2::Compression;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("acl.rules.gz");
        let mut encoder = GzEncoder::new(File::create(&path).unwrap(), Compression::default());
        encoder.write_all(FILTERS.as_bytes()).unwrap();
        encoder.finish().unwrap();

        let rules = load_rules(&path).unwrap();
        assert_eq!(rules, read_rules(FILTERS.as_bytes()).unwrap());
    }

    #[test]
    fn test_load_plain_packets() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "1 2 3 4 5").unwrap();
        writeln!(file, "6 7 8 9 10").unwrap();

        let packets = load_packets(file.path(), 5).unwrap();
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[1], vec![6, 7, 8, 9, 10]);
    }

    #[test]
    fn test_format_rule_round_trips() {
        let rules = read_rules(FILTERS.as_bytes()).unwrap();
        let text: Vec<String> = rules.iter().filter_map(format_rule).collect();
        let reparsed = read_rules(text.join("\n").as_bytes()).unwrap();
        assert_eq!(reparsed, rules);
    }
}
