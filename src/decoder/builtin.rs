use super::Decoder;
use crate::config::DecoderConfig;
use std::fmt::Write;
use std::net::{Ipv4Addr, Ipv6Addr};

/// Native-endian unsigned integer of 1, 2, 4, or 8 bytes, as decimal
pub struct Uint;

impl Decoder for Uint {
    fn decode(&self, input: &[u8], _conf: &DecoderConfig) -> Result<Vec<u8>, String> {
        let value = match input.len() {
            1 => u64::from(input[0]),
            2 => u64::from(u16::from_ne_bytes([input[0], input[1]])),
            4 => u64::from(u32::from_ne_bytes(
                input.try_into().map_err(|_| "bad u32".to_string())?,
            )),
            8 => u64::from_ne_bytes(input.try_into().map_err(|_| "bad u64".to_string())?),
            n => return Err(format!("unsupported integer size {}", n)),
        };
        Ok(value.to_string().into_bytes())
    }
}

/// C string: everything up to the first NUL
pub struct Str;

impl Decoder for Str {
    fn decode(&self, input: &[u8], _conf: &DecoderConfig) -> Result<Vec<u8>, String> {
        let end = input.iter().position(|&b| b == 0).unwrap_or(input.len());
        Ok(String::from_utf8_lossy(&input[..end]).into_owned().into_bytes())
    }
}

pub struct Hex;

impl Decoder for Hex {
    fn decode(&self, input: &[u8], _conf: &DecoderConfig) -> Result<Vec<u8>, String> {
        let mut out = String::with_capacity(input.len() * 2);
        for byte in input {
            let _ = write!(out, "{:02x}", byte);
        }
        Ok(out.into_bytes())
    }
}

/// IPv4 (4 bytes) or IPv6 (16 bytes) address in network order
pub struct InetIp;

impl Decoder for InetIp {
    fn decode(&self, input: &[u8], _conf: &DecoderConfig) -> Result<Vec<u8>, String> {
        let addr = match input.len() {
            4 => {
                let octets: [u8; 4] = input.try_into().map_err(|_| "bad ipv4".to_string())?;
                Ipv4Addr::from(octets).to_string()
            }
            16 => {
                let octets: [u8; 16] = input.try_into().map_err(|_| "bad ipv6".to_string())?;
                Ipv6Addr::from(octets).to_string()
            }
            n => return Err(format!("unsupported address size {}", n)),
        };
        Ok(addr.into_bytes())
    }
}

/// Maps the input through the configured `static_map`
pub struct StaticMap;

impl Decoder for StaticMap {
    fn decode(&self, input: &[u8], conf: &DecoderConfig) -> Result<Vec<u8>, String> {
        let key = String::from_utf8_lossy(input);
        match conf.static_map.get(key.as_ref()) {
            Some(value) => Ok(value.clone().into_bytes()),
            None if conf.allow_unknown => Ok(input.to_vec()),
            None => Err(format!("no static_map entry for {:?}", key)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(decoder: &dyn Decoder, input: &[u8]) -> Result<String, String> {
        decoder
            .decode(input, &DecoderConfig::named("test"))
            .map(|out| String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_uint_sizes() {
        assert_eq!(decode(&Uint, &[200]).unwrap(), "200");
        assert_eq!(decode(&Uint, &513u16.to_ne_bytes()).unwrap(), "513");
        assert_eq!(decode(&Uint, &70000u32.to_ne_bytes()).unwrap(), "70000");
        assert_eq!(decode(&Uint, &u64::MAX.to_ne_bytes()).unwrap(), u64::MAX.to_string());
        assert!(decode(&Uint, &[1, 2, 3]).is_err());
    }

    #[test]
    fn test_string_stops_at_nul() {
        assert_eq!(decode(&Str, b"sshd\0\0garbage").unwrap(), "sshd");
        assert_eq!(decode(&Str, b"no-nul").unwrap(), "no-nul");
    }

    #[test]
    fn test_hex() {
        assert_eq!(decode(&Hex, &[0x00, 0xab, 0x10]).unwrap(), "00ab10");
    }

    #[test]
    fn test_inet_ip() {
        assert_eq!(decode(&InetIp, &[10, 0, 0, 5]).unwrap(), "10.0.0.5");
        let mut v6 = [0u8; 16];
        v6[15] = 1;
        assert_eq!(decode(&InetIp, &v6).unwrap(), "::1");
        assert!(decode(&InetIp, &[1, 2]).is_err());
    }

    #[test]
    fn test_static_map_allow_unknown() {
        let mut conf = DecoderConfig::named("static_map");
        conf.static_map.insert("6".to_string(), "tcp".to_string());

        assert_eq!(StaticMap.decode(b"6", &conf).unwrap(), b"tcp");
        assert!(StaticMap.decode(b"17", &conf).is_err());

        conf.allow_unknown = true;
        assert_eq!(StaticMap.decode(b"17", &conf).unwrap(), b"17");
    }
}
