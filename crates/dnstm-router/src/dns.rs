//! Minimal DNS query parsing
//!
//! The router only needs the name of the first question to pick a route;
//! everything else in the packet is forwarded untouched.

use crate::error::RouterError;

const HEADER_LEN: usize = 12;
const MAX_NAME_LEN: usize = 255;

/// Extract the first question name, lowercased and without the root dot
pub fn parse_query_name(packet: &[u8]) -> Result<String, RouterError> {
    if packet.len() < HEADER_LEN {
        return Err(RouterError::MalformedQuery("packet shorter than header"));
    }

    // QR bit set means this is a response
    if packet[2] & 0x80 != 0 {
        return Err(RouterError::MalformedQuery("not a query"));
    }

    let qdcount = u16::from_be_bytes([packet[4], packet[5]]);
    if qdcount == 0 {
        return Err(RouterError::MalformedQuery("no question"));
    }

    let mut offset = HEADER_LEN;
    let mut labels: Vec<String> = Vec::new();
    let mut name_len = 0usize;

    loop {
        let len = *packet
            .get(offset)
            .ok_or(RouterError::MalformedQuery("truncated name"))? as usize;
        offset += 1;

        if len == 0 {
            break;
        }
        // Compression pointers and extended label types never start a question name
        if len & 0xC0 != 0 {
            return Err(RouterError::MalformedQuery("unsupported label type"));
        }

        let label = packet
            .get(offset..offset + len)
            .ok_or(RouterError::MalformedQuery("truncated label"))?;
        offset += len;

        name_len += len + 1;
        if name_len > MAX_NAME_LEN {
            return Err(RouterError::MalformedQuery("name too long"));
        }

        labels.push(String::from_utf8_lossy(label).to_ascii_lowercase());
    }

    // QTYPE and QCLASS must follow the name
    if packet.len() < offset + 4 {
        return Err(RouterError::MalformedQuery("truncated question"));
    }

    Ok(labels.join("."))
}

#[cfg(test)]
pub(crate) fn build_query(id: u16, name: &str) -> Vec<u8> {
    let mut packet = Vec::new();
    packet.extend_from_slice(&id.to_be_bytes());
    packet.extend_from_slice(&[0x01, 0x00]); // RD
    packet.extend_from_slice(&[0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
    for label in name.split('.').filter(|l| !l.is_empty()) {
        packet.push(label.len() as u8);
        packet.extend_from_slice(label.as_bytes());
    }
    packet.push(0);
    packet.extend_from_slice(&[0x00, 0x10, 0x00, 0x01]); // TXT IN
    packet
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_query_name() {
        let packet = build_query(0x1234, "AbC.T.Example.COM");
        assert_eq!(parse_query_name(&packet).unwrap(), "abc.t.example.com");
    }

    #[test]
    fn test_parse_root_query() {
        let packet = build_query(1, "");
        assert_eq!(parse_query_name(&packet).unwrap(), "");
    }

    #[test]
    fn test_rejects_short_and_truncated_packets() {
        assert!(parse_query_name(&[0u8; 5]).is_err());

        let packet = build_query(1, "t.example.com");
        assert!(parse_query_name(&packet[..packet.len() - 6]).is_err());
        assert!(parse_query_name(&packet[..packet.len() - 2]).is_err());
    }

    #[test]
    fn test_rejects_responses_and_empty_questions() {
        let mut response = build_query(1, "t.example.com");
        response[2] |= 0x80;
        assert!(parse_query_name(&response).is_err());

        let mut no_question = build_query(1, "t.example.com");
        no_question[5] = 0;
        assert!(parse_query_name(&no_question).is_err());
    }

    #[test]
    fn test_rejects_compression_pointer() {
        let mut packet = build_query(1, "");
        packet[12] = 0xC0;
        packet.insert(13, 0x0C);
        assert!(matches!(
            parse_query_name(&packet),
            Err(RouterError::MalformedQuery("unsupported label type"))
        ));
    }
}
