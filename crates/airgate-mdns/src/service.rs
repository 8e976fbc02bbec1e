use std::net::IpAddr;

use crate::packet::{Name, RData, Record};

/// TTL on every record we announce: 5 minutes.
pub const RECORD_TTL: u32 = 300;

/// The meta-query name DNS-SD browsers use to enumerate service types.
pub const SERVICE_ENUMERATION: &str = "_services._dns-sd._udp.local";

/// An advertised service instance, immutable once registered.
///
/// `service` is the bare type (`_airdrop._tcp`); instance and host are single
/// labels (for the bridge: the receiver id). The derived record set is
/// PTR (enumeration + service), SRV, TXT and one A/AAAA per endpoint address.
#[derive(Debug, Clone)]
pub struct ServiceInstance {
    pub service: String,
    pub instance: String,
    pub host: String,
    pub port: u16,
    pub addrs: Vec<IpAddr>,
    pub txt: Vec<(String, String)>,
}

impl ServiceInstance {
    pub fn service_domain(&self) -> Name {
        Name::new(format!("{}.local", self.service))
    }

    pub fn instance_domain(&self) -> Name {
        Name::new(format!("{}.{}.local", self.instance, self.service))
    }

    pub fn host_domain(&self) -> Name {
        Name::new(format!("{}.local", self.host))
    }

    /// Key identifying this instance's records in the catalog.
    pub fn owner_key(&self) -> String {
        self.instance_domain().as_str().to_ascii_lowercase()
    }

    /// The full record set at the announcement TTL.
    pub fn records(&self) -> Vec<Record> {
        self.records_with_ttl(RECORD_TTL)
    }

    /// The same records with TTL 0, for the goodbye on unregister.
    pub fn goodbye_records(&self) -> Vec<Record> {
        self.records_with_ttl(0)
    }

    fn records_with_ttl(&self, ttl: u32) -> Vec<Record> {
        let mut records = Vec::with_capacity(4 + self.addrs.len());

        // Shared PTRs: never cache-flush, other instances coexist.
        records.push(Record {
            name: Name::new(SERVICE_ENUMERATION),
            ttl,
            cache_flush: false,
            rdata: RData::Ptr(self.service_domain()),
        });
        records.push(Record {
            name: self.service_domain(),
            ttl,
            cache_flush: false,
            rdata: RData::Ptr(self.instance_domain()),
        });

        // Unique records carry the cache-flush bit.
        records.push(Record {
            name: self.instance_domain(),
            ttl,
            cache_flush: true,
            rdata: RData::Srv {
                priority: 0,
                weight: 0,
                port: self.port,
                target: self.host_domain(),
            },
        });
        records.push(Record {
            name: self.instance_domain(),
            ttl,
            cache_flush: true,
            rdata: RData::Txt(
                self.txt
                    .iter()
                    .map(|(k, v)| format!("{k}={v}"))
                    .collect(),
            ),
        });

        for addr in &self.addrs {
            let rdata = match addr {
                IpAddr::V4(v4) => RData::A(*v4),
                IpAddr::V6(v6) => RData::Aaaa(*v6),
            };
            records.push(Record {
                name: self.host_domain(),
                ttl,
                cache_flush: true,
                rdata,
            });
        }

        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{TYPE_A, TYPE_AAAA, TYPE_PTR, TYPE_SRV, TYPE_TXT};

    fn sample() -> ServiceInstance {
        ServiceInstance {
            service: "_airdrop._tcp".into(),
            instance: "ab12cd34ef56".into(),
            host: "ab12cd34ef56".into(),
            port: 8443,
            addrs: vec![
                "169.254.7.3".parse().unwrap(),
                "fe80::aaaa".parse().unwrap(),
            ],
            txt: vec![("flags".into(), "651".into())],
        }
    }

    #[test]
    fn derives_expected_record_set() {
        let svc = sample();
        let records = svc.records();
        assert_eq!(records.len(), 6);

        let count = |rtype: u16| records.iter().filter(|r| r.rdata.rtype() == rtype).count();
        assert_eq!(count(TYPE_PTR), 2);
        assert_eq!(count(TYPE_SRV), 1);
        assert_eq!(count(TYPE_TXT), 1);
        assert_eq!(count(TYPE_A), 1);
        assert_eq!(count(TYPE_AAAA), 1);

        assert!(records.iter().all(|r| r.ttl == RECORD_TTL));

        let txt = records
            .iter()
            .find(|r| r.rdata.rtype() == TYPE_TXT)
            .unwrap();
        match &txt.rdata {
            RData::Txt(strings) => assert_eq!(strings, &vec!["flags=651".to_string()]),
            other => panic!("wrong rdata: {other:?}"),
        }
    }

    #[test]
    fn goodbye_zeroes_every_ttl() {
        let svc = sample();
        assert!(svc.goodbye_records().iter().all(|r| r.ttl == 0));
    }

    #[test]
    fn ptr_records_are_shared_not_flushed() {
        let svc = sample();
        for r in svc.records() {
            if r.rdata.rtype() == TYPE_PTR {
                assert!(!r.cache_flush);
            } else {
                assert!(r.cache_flush);
            }
        }
    }
}
