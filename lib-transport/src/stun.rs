//! A minimal RFC 5389 STUN client (spec §4.4): binding requests to learn a
//! node's server-reflexive (public) address, tried against each configured
//! server in order until one answers.

use std::net::SocketAddr;
use std::time::Duration;

use rand::RngCore;
use tokio::net::UdpSocket;

use crate::TransportError;

const MAGIC_COOKIE: u32 = 0x2112_A442;
const BINDING_REQUEST: u16 = 0x0001;
const BINDING_SUCCESS: u16 = 0x0101;
const ATTR_MAPPED_ADDRESS: u16 = 0x0001;
const ATTR_XOR_MAPPED_ADDRESS: u16 = 0x0020;

/// Builds a 20-byte STUN binding-request header (no attributes): message
/// type, zero length, magic cookie, and a random 96-bit transaction id.
fn build_binding_request() -> ([u8; 20], [u8; 12]) {
    let mut transaction_id = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut transaction_id);

    let mut packet = [0u8; 20];
    packet[0..2].copy_from_slice(&BINDING_REQUEST.to_be_bytes());
    packet[2..4].copy_from_slice(&0u16.to_be_bytes());
    packet[4..8].copy_from_slice(&MAGIC_COOKIE.to_be_bytes());
    packet[8..20].copy_from_slice(&transaction_id);
    (packet, transaction_id)
}

/// Parses a STUN binding-success response, preferring XOR-MAPPED-ADDRESS
/// over the legacy MAPPED-ADDRESS when both are present.
fn parse_binding_response(data: &[u8], transaction_id: &[u8; 12]) -> Option<SocketAddr> {
    if data.len() < 20 {
        return None;
    }
    let msg_type = u16::from_be_bytes([data[0], data[1]]);
    if msg_type != BINDING_SUCCESS {
        return None;
    }
    let length = u16::from_be_bytes([data[2], data[3]]) as usize;
    if &data[4..8] != MAGIC_COOKIE.to_be_bytes() || &data[8..20] != transaction_id {
        return None;
    }

    let mut offset = 20;
    let end = (20 + length).min(data.len());
    let mut mapped_address = None;
    let mut xor_mapped_address = None;

    while offset + 4 <= end {
        let attr_type = u16::from_be_bytes([data[offset], data[offset + 1]]);
        let attr_len = u16::from_be_bytes([data[offset + 2], data[offset + 3]]) as usize;
        let value_start = offset + 4;
        let value_end = value_start + attr_len;
        if value_end > end {
            break;
        }
        let value = &data[value_start..value_end];

        if attr_type == ATTR_MAPPED_ADDRESS {
            mapped_address = parse_mapped_address(value, None);
        } else if attr_type == ATTR_XOR_MAPPED_ADDRESS {
            xor_mapped_address = parse_mapped_address(value, Some(transaction_id));
        }

        offset = value_end + (4 - attr_len % 4) % 4;
    }

    xor_mapped_address.or(mapped_address)
}

fn parse_mapped_address(value: &[u8], xor_transaction_id: Option<&[u8; 12]>) -> Option<SocketAddr> {
    if value.len() < 8 {
        return None;
    }
    let family = value[1];
    let mut port = u16::from_be_bytes([value[2], value[3]]);
    if xor_transaction_id.is_some() {
        port ^= (MAGIC_COOKIE >> 16) as u16;
    }

    match family {
        0x01 => {
            let mut addr_bytes = [value[4], value[5], value[6], value[7]];
            if let Some(_txn) = xor_transaction_id {
                let cookie = MAGIC_COOKIE.to_be_bytes();
                for i in 0..4 {
                    addr_bytes[i] ^= cookie[i];
                }
            }
            Some(SocketAddr::from((addr_bytes, port)))
        }
        _ => None,
    }
}

/// Queries STUN servers in order, returning the first successfully
/// resolved public address (spec §4.4).
pub async fn discover_public_address(
    socket: &UdpSocket,
    servers: &[SocketAddr],
    timeout: Duration,
) -> Result<SocketAddr, TransportError> {
    for &server in servers {
        let (packet, transaction_id) = build_binding_request();
        if socket.send_to(&packet, server).await.is_err() {
            continue;
        }

        let mut buf = [0u8; 512];
        let result = tokio::time::timeout(timeout, socket.recv_from(&mut buf)).await;
        if let Ok(Ok((len, from))) = result {
            if from != server {
                continue;
            }
            if let Some(addr) = parse_binding_response(&buf[..len], &transaction_id) {
                return Ok(addr);
            }
        }
    }
    Err(TransportError::Stun("no configured STUN server responded".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binding_request_has_correct_header_shape() {
        let (packet, transaction_id) = build_binding_request();
        assert_eq!(u16::from_be_bytes([packet[0], packet[1]]), BINDING_REQUEST);
        assert_eq!(u16::from_be_bytes([packet[2], packet[3]]), 0);
        assert_eq!(&packet[4..8], MAGIC_COOKIE.to_be_bytes());
        assert_eq!(&packet[8..20], &transaction_id);
    }

    #[test]
    fn parses_xor_mapped_address() {
        let (_, transaction_id) = build_binding_request();
        let mut response = vec![0u8; 20];
        response[0..2].copy_from_slice(&BINDING_SUCCESS.to_be_bytes());
        response[4..8].copy_from_slice(&MAGIC_COOKIE.to_be_bytes());
        response[8..20].copy_from_slice(&transaction_id);

        // XOR-MAPPED-ADDRESS attribute: family IPv4, port xor'd with cookie high bits.
        let port: u16 = 4242;
        let xor_port = port ^ (MAGIC_COOKIE >> 16) as u16;
        let cookie = MAGIC_COOKIE.to_be_bytes();
        let ip = [203u8, 0, 113, 9];
        let xor_ip: Vec<u8> = ip.iter().zip(cookie.iter()).map(|(a, b)| a ^ b).collect();

        let mut attr = vec![0u8, 0x01];
        attr.extend_from_slice(&xor_port.to_be_bytes());
        attr.extend_from_slice(&xor_ip);

        response[2..4].copy_from_slice(&((4 + attr.len()) as u16).to_be_bytes());
        response.extend_from_slice(&(ATTR_XOR_MAPPED_ADDRESS).to_be_bytes());
        response.extend_from_slice(&(attr.len() as u16).to_be_bytes());
        response.extend_from_slice(&attr);

        let parsed = parse_binding_response(&response, &transaction_id).unwrap();
        assert_eq!(parsed.port(), port);
        assert_eq!(parsed.ip().to_string(), "203.0.113.9");
    }
}
