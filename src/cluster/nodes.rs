// Copyright (c) 2018 Nuclear Furnace
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in all
// copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN THE
// SOFTWARE.

//! Parses the body of a `CLUSTER NODES` reply: one line per node,
//! whitespace-separated fields, trailing slot ranges and migration
//! markers. Migration/importing markers (`[slot-><node>]`) are parsed
//! out but never turned into slot assignments -- MOVED/ASK handle
//! mid-flight migrations instead.

/// One parsed `CLUSTER NODES` line.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeLine {
    pub id: String,
    pub addr: String,
    pub is_myself: bool,
    pub is_slave: bool,
    pub slots: Vec<(u16, u16)>,
}

/// Parses every line of a `CLUSTER NODES` reply body. Malformed lines
/// (too few fields, missing id) are skipped rather than aborting the
/// whole refresh -- a single corrupt line shouldn't block every other
/// node's slot assignment.
pub fn parse_cluster_nodes(body: &str) -> Vec<NodeLine> {
    body.lines().filter_map(parse_line).collect()
}

fn parse_line(line: &str) -> Option<NodeLine> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }

    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 8 {
        return None;
    }

    let id = fields[0].to_string();
    let addr_field = fields[1];
    let addr = match addr_field.find('@') {
        Some(at) => &addr_field[..at],
        None => addr_field,
    };
    if addr.is_empty() {
        return None;
    }

    let flags = fields[2];
    let is_myself = flags.split(',').any(|f| f == "myself");
    let is_slave = flags.split(',').any(|f| f == "slave");

    let mut slots = Vec::new();
    for field in &fields[8..] {
        if field.starts_with('[') {
            // Migrating/importing marker: "[<slot>-><node-id>]" or
            // "[<slot>-<-<node-id>]". Deliberately ignored.
            continue;
        }
        if let Some(dash) = field.find('-') {
            let (start, stop) = field.split_at(dash);
            let stop = &stop[1..];
            if let (Ok(start), Ok(stop)) = (start.parse::<u16>(), stop.parse::<u16>()) {
                slots.push((start, stop));
            }
        } else if let Ok(slot) = field.parse::<u16>() {
            slots.push((slot, slot));
        }
    }

    Some(NodeLine {
        id,
        addr: addr.to_string(),
        is_myself,
        is_slave,
        slots,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_master_line_with_single_range() {
        let body = "07c37dfeb235213a872192d90877d0cd55635b91 127.0.0.1:30001@31001 myself,master - 0 0 1 connected 0-5460\n";
        let lines = parse_cluster_nodes(body);
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].addr, "127.0.0.1:30001");
        assert!(lines[0].is_myself);
        assert!(!lines[0].is_slave);
        assert_eq!(lines[0].slots, vec![(0, 5460)]);
    }

    #[test]
    fn slave_lines_carry_no_slots() {
        let body = "e7d1eecce10fd6bb5eb35b9f99a514335d9ba9ca 127.0.0.1:30004@31004 slave 07c37dfeb235213a872192d90877d0cd55635b91 0 0 1 connected\n";
        let lines = parse_cluster_nodes(body);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].is_slave);
        assert!(lines[0].slots.is_empty());
    }

    #[test]
    fn ignores_migrating_and_importing_markers() {
        let body = "id1 127.0.0.1:30001@31001 master - 0 0 1 connected 0-100 [200->-id2] [300-<-id2]\n";
        let lines = parse_cluster_nodes(body);
        assert_eq!(lines[0].slots, vec![(0, 100)]);
    }

    #[test]
    fn skips_blank_and_comment_lines() {
        let body = "\n# comment\nid1 127.0.0.1:30001@31001 master - 0 0 1 connected 0-100\n\n";
        let lines = parse_cluster_nodes(body);
        assert_eq!(lines.len(), 1);
    }

    #[test]
    fn tolerates_node_with_zero_ranges() {
        let body = "id1 127.0.0.1:30001@31001 master - 0 0 1 connected\n";
        let lines = parse_cluster_nodes(body);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].slots.is_empty());
    }
}
