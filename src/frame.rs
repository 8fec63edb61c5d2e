//! 802.11 probe request filtering and classification.
//!
//! Frames arrive from the monitor-mode socket with a Radiotap header in
//! front. The pre-filter strips that header and looks only at the frame
//! control field, so everything that is not a probe request is dropped
//! before its body is touched. The classifier then walks the tagged
//! parameters for the SSID element and builds a [`ProbeObservation`].

use std::fmt;

use chrono::{NaiveTime, Timelike};
use libwifi::frame::components::MacAddress;
use radiotap::field::{self, Header, Kind};
use radiotap::Radiotap;

const IEEE80211_FC_TYPE_MGMT: u8 = 0;
const IEEE80211_FC_SUBTYPE_PROBE_REQ: u8 = 4;

/// FC + Duration + Addr1 + Addr2 + Addr3 + SeqCtl.
const MGMT_HEADER_LEN: usize = 24;

/// Address 2 (transmitter) offset inside the management header.
const ADDR2_OFFSET: usize = 10;

const FCS_LEN: usize = 4;

pub const ELEMENT_ID_SSID: u8 = 0;

/// A probe request that made it past the pre-filter.
#[derive(Debug, Clone)]
pub struct ProbeFrame<'a> {
    pub source: MacAddress,
    /// Tagged parameters following the management header.
    pub elements: &'a [u8],
}

impl<'a> ProbeFrame<'a> {
    /// Strip the Radiotap header (and a trailing FCS, when the Radiotap flags
    /// announce one) and pre-filter the 802.11 frame behind it.
    pub fn from_radiotap(packet: &'a [u8]) -> Result<Option<Self>, String> {
        check_vendor_namespaces(packet)?;
        let radiotap = Radiotap::from_bytes(packet)
            .map_err(|error| format!("Couldn't read packet data with Radiotap: {error:?}"))?;

        let mut payload = packet
            .get(radiotap.header.length..)
            .ok_or_else(|| "Radiotap header longer than packet".to_string())?;

        let fcs = radiotap.flags.map_or(false, |flags| flags.fcs);
        if fcs && payload.len() >= FCS_LEN {
            payload = &payload[..payload.len() - FCS_LEN];
        }

        Ok(Self::from_dot11(payload))
    }

    /// Returns `None` for anything other than a management probe request.
    pub fn from_dot11(frame: &'a [u8]) -> Option<Self> {
        if frame.len() < MGMT_HEADER_LEN {
            return None;
        }

        let fc0 = frame[0];
        let version = fc0 & 0x03;
        let frame_type = (fc0 >> 2) & 0x03;
        let frame_subtype = (fc0 >> 4) & 0x0F;

        if version != 0
            || frame_type != IEEE80211_FC_TYPE_MGMT
            || frame_subtype != IEEE80211_FC_SUBTYPE_PROBE_REQ
        {
            return None;
        }

        let mut source = [0u8; 6];
        source.copy_from_slice(&frame[ADDR2_OFFSET..ADDR2_OFFSET + 6]);

        Some(ProbeFrame {
            source: MacAddress(source),
            elements: &frame[MGMT_HEADER_LEN..],
        })
    }
}

/// Reject Radiotap headers whose vendor namespace `skip_length` runs past
/// the header. `Radiotap::from_bytes` slices those without a bounds check.
///
/// Fields are walked with the same alignment and sizes the parser uses.
fn check_vendor_namespaces(packet: &[u8]) -> Result<(), String> {
    let header: Header = match field::from_bytes(packet) {
        Ok(header) => header,
        // The parser reports these itself.
        Err(_) => return Ok(()),
    };
    let data = &packet[..header.length];

    let mut position = header.size;
    for kind in &header.present {
        let align = kind.align() as usize;
        position = (position + align - 1) & !(align - 1);
        let mut end = position + kind.size();
        if end > data.len() {
            return Ok(());
        }

        if matches!(kind, Kind::VendorNamespace(_)) {
            let skip_length = u16::from_le_bytes([data[position + 4], data[position + 5]]);
            end += usize::from(skip_length);
            if end > data.len() {
                return Err(format!(
                    "Radiotap vendor namespace of {} bytes overruns header of {} bytes",
                    skip_length, header.length
                ));
            }
        }
        position = end;
    }
    Ok(())
}

/// The network a probe request asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestedName {
    Named(String),
    /// Empty or missing SSID element: the client is scanning for any network.
    Wildcard,
}

impl fmt::Display for RequestedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestedName::Named(name) => f.write_str(name),
            RequestedName::Wildcard => f.write_str("*"),
        }
    }
}

/// One logged probe request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeObservation {
    hour: u32,
    minute: u32,
    second: u32,
    source_address: String,
    requested_name: RequestedName,
}

impl ProbeObservation {
    pub fn new(at: NaiveTime, source: &MacAddress, requested_name: RequestedName) -> Self {
        ProbeObservation {
            hour: at.hour(),
            minute: at.minute(),
            second: at.second(),
            source_address: source.to_string(),
            requested_name,
        }
    }

    pub fn source_address(&self) -> &str {
        &self.source_address
    }

    pub fn requested_name(&self) -> &RequestedName {
        &self.requested_name
    }

    /// Fields in log column order: hour, minute, second, src_mac, ssid.
    pub fn record(&self) -> [String; 5] {
        [
            self.hour.to_string(),
            self.minute.to_string(),
            self.second.to_string(),
            self.source_address.clone(),
            self.requested_name.to_string(),
        ]
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FrameClassifier {
    ignore_wildcards: bool,
}

impl FrameClassifier {
    pub fn new(ignore_wildcards: bool) -> Self {
        FrameClassifier { ignore_wildcards }
    }

    /// Build the observation for `frame`, or `None` when policy drops it.
    ///
    /// Invalid UTF-8 in the SSID is replaced with U+FFFD.
    pub fn classify(&self, frame: &ProbeFrame<'_>, at: NaiveTime) -> Option<ProbeObservation> {
        let requested_name = match ssid_element(frame.elements) {
            Some(ssid) if !ssid.is_empty() => {
                RequestedName::Named(String::from_utf8_lossy(ssid).into_owned())
            }
            // An empty element and no element at all are the same broadcast scan.
            _ => RequestedName::Wildcard,
        };

        if requested_name == RequestedName::Wildcard && self.ignore_wildcards {
            return None;
        }

        Some(ProbeObservation::new(at, &frame.source, requested_name))
    }
}

/// Payload of the first SSID element. A truncated element ends the walk.
fn ssid_element(elements: &[u8]) -> Option<&[u8]> {
    let mut rest = elements;
    while let [id, len, tail @ ..] = rest {
        let len = *len as usize;
        if tail.len() < len {
            return None;
        }
        let (data, next) = tail.split_at(len);
        if *id == ELEMENT_ID_SSID {
            return Some(data);
        }
        rest = next;
    }
    None
}

/// `MacAddress::from_str`, also accepting `-` separators and bare hex digits.
pub fn parse_mac(text: &str) -> Option<MacAddress> {
    let text = text.trim();
    let groups: Vec<&str> = if text.contains(':') || text.contains('-') {
        text.split(|c: char| c == ':' || c == '-').collect()
    } else if text.is_ascii() && text.len() == 12 {
        (0..12).step_by(2).map(|i| &text[i..i + 2]).collect()
    } else {
        return None;
    };

    // from_str_radix also takes single digits and a leading `+`.
    if groups
        .iter()
        .any(|group| group.len() != 2 || !group.bytes().all(|b| b.is_ascii_hexdigit()))
    {
        return None;
    }
    groups.join(":").parse().ok()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    const CLIENT: [u8; 6] = [0xDA, 0xA1, 0x19, 0x0B, 0x2C, 0x7E];

    fn noon() -> NaiveTime {
        NaiveTime::from_hms_opt(12, 30, 45).unwrap()
    }

    pub(crate) fn probe_request(source: [u8; 6], elements: &[u8]) -> Vec<u8> {
        let mut frame = vec![0x40, 0x00, 0x00, 0x00];
        frame.extend_from_slice(&[0xFF; 6]);
        frame.extend_from_slice(&source);
        frame.extend_from_slice(&[0xFF; 6]);
        frame.extend_from_slice(&[0x10, 0x00]);
        frame.extend_from_slice(elements);
        frame
    }

    pub(crate) fn ssid(name: &[u8]) -> Vec<u8> {
        let mut element = vec![ELEMENT_ID_SSID, name.len() as u8];
        element.extend_from_slice(name);
        element
    }

    fn classify(classifier: FrameClassifier, elements: &[u8]) -> Option<ProbeObservation> {
        let raw = probe_request(CLIENT, elements);
        let frame = ProbeFrame::from_dot11(&raw).expect("probe request");
        classifier.classify(&frame, noon())
    }

    #[test]
    fn test_named_ssid() {
        let obs = classify(FrameClassifier::new(false), &ssid(b"MyWifi")).unwrap();
        assert_eq!(
            obs.requested_name(),
            &RequestedName::Named("MyWifi".to_string())
        );
        assert_eq!(obs.source_address(), "da:a1:19:0b:2c:7e");
        assert_eq!(
            obs.record(),
            ["12", "30", "45", "da:a1:19:0b:2c:7e", "MyWifi"].map(String::from)
        );
    }

    #[test]
    fn test_invalid_utf8_is_replaced() {
        let obs = classify(FrameClassifier::new(true), &ssid(&[b'A', 0xFF, b'B'])).unwrap();
        assert_eq!(
            obs.requested_name(),
            &RequestedName::Named("A\u{FFFD}B".to_string())
        );
    }

    #[test]
    fn test_empty_ssid_follows_wildcard_policy() {
        assert!(classify(FrameClassifier::new(true), &ssid(b"")).is_none());

        let obs = classify(FrameClassifier::new(false), &ssid(b"")).unwrap();
        assert_eq!(obs.requested_name(), &RequestedName::Wildcard);
        assert_eq!(obs.record()[4], "*");
    }

    #[test]
    fn test_missing_ssid_is_wildcard() {
        // Supported rates only.
        let rates = [0x01, 0x04, 0x02, 0x04, 0x0B, 0x16];
        assert!(classify(FrameClassifier::new(true), &rates).is_none());
        assert!(classify(FrameClassifier::new(true), &[]).is_none());

        let obs = classify(FrameClassifier::new(false), &rates).unwrap();
        assert_eq!(obs.requested_name(), &RequestedName::Wildcard);
    }

    #[test]
    fn test_first_ssid_element_wins() {
        let mut elements = vec![0x01, 0x02, 0x82, 0x84];
        elements.extend(ssid(b"First"));
        elements.extend(ssid(b"Second"));
        let obs = classify(FrameClassifier::new(false), &elements).unwrap();
        assert_eq!(
            obs.requested_name(),
            &RequestedName::Named("First".to_string())
        );
    }

    #[test]
    fn test_truncated_element_stops_walk() {
        let elements = [ELEMENT_ID_SSID, 10, b'a', b'b'];
        let obs = classify(FrameClassifier::new(false), &elements).unwrap();
        assert_eq!(obs.requested_name(), &RequestedName::Wildcard);
    }

    #[test]
    fn test_prefilter_rejects_other_frames() {
        let mut beacon = probe_request(CLIENT, &ssid(b"Net"));
        beacon[0] = 0x80;
        assert!(ProbeFrame::from_dot11(&beacon).is_none());

        let mut data = probe_request(CLIENT, &[]);
        data[0] = 0x08;
        assert!(ProbeFrame::from_dot11(&data).is_none());

        assert!(ProbeFrame::from_dot11(&[0x40, 0x00, 0x00]).is_none());
    }

    #[test]
    fn test_from_radiotap() {
        // Version 0, length 8, no present fields.
        let mut packet = vec![0x00, 0x00, 0x08, 0x00, 0x00, 0x00, 0x00, 0x00];
        packet.extend(probe_request(CLIENT, &ssid(b"Guest")));

        let frame = ProbeFrame::from_radiotap(&packet).unwrap().unwrap();
        assert_eq!(frame.source.0, CLIENT);
        assert_eq!(ssid_element(frame.elements), Some(&b"Guest"[..]));
    }

    #[test]
    fn test_vendor_namespace_overrun_is_an_error() {
        // Length 16, vendor namespace announcing a 4096 byte skip.
        let mut packet = vec![
            0x00, 0x00, 0x10, 0x00, 0x00, 0x00, 0x00, 0x40, 0x00, 0x00, 0x00, 0x00, 0x00, 0x10,
            0x80, 0x00,
        ];
        packet.extend(probe_request(CLIENT, &ssid(b"Guest")));

        let err = ProbeFrame::from_radiotap(&packet).unwrap_err();
        assert!(err.contains("vendor namespace"));
    }

    #[test]
    fn test_vendor_namespace_within_header() {
        // Length 16: OUI, sub namespace 0, skip 2, two vendor bytes.
        let mut packet = vec![
            0x00, 0x00, 0x10, 0x00, 0x00, 0x00, 0x00, 0x40, 0x00, 0x11, 0x22, 0x00, 0x02, 0x00,
            0xAA, 0xBB,
        ];
        packet.extend(probe_request(CLIENT, &ssid(b"Guest")));

        let frame = ProbeFrame::from_radiotap(&packet).unwrap().unwrap();
        assert_eq!(frame.source.0, CLIENT);
        assert_eq!(ssid_element(frame.elements), Some(&b"Guest"[..]));
    }

    #[test]
    fn test_parse_mac() {
        let expected = [0xAA, 0xBB, 0xCC, 0x00, 0x11, 0x22];
        assert_eq!(parse_mac("aa:bb:cc:00:11:22").unwrap().0, expected);
        assert_eq!(parse_mac("AA-BB-CC-00-11-22").unwrap().0, expected);
        assert_eq!(parse_mac("aabbcc001122").unwrap().0, expected);
        assert!(parse_mac("aa:bb:cc:00:11").is_none());
        assert!(parse_mac("aa:bb:cc:00:11:zz").is_none());
        assert!(parse_mac("a:bb:cc:00:11:223").is_none());
    }

    #[test]
    fn test_parse_mac_rejects_loose_groups() {
        assert!(parse_mac("+a:bb:cc:00:11:22").is_none());
        assert!(parse_mac("aabbcc00112").is_none());
        assert!(parse_mac("UP").is_none());
        assert_eq!(
            parse_mac(" AABBCC001122 ").unwrap().to_string(),
            "aa:bb:cc:00:11:22"
        );
    }
}
