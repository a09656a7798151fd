//! Minimal multi-threaded NetFlow v5 collector: binds one socket, prints a
//! line per PDU, and installs a Ctrl-C handler that tears the base down
//! through the same path a signal handler would use in the library's C
//! ancestor.

use std::net::SocketAddr;
use std::sync::Arc;

use silk_flow::config::NetflowSourceConfig;
use silk_flow::netflow5::source::Base;

fn main() {
    env_logger::init();
    let addr: SocketAddr = "0.0.0.0:9995".parse().expect("valid socket address");
    let base = Base::get_or_bind(&[addr], NetflowSourceConfig::default()).expect("bind listener");

    let stop_base = Arc::clone(&base);
    ctrlc::set_handler(move || {
        log::info!("shutting down netflow5 listener");
        stop_base.stop();
    })
    .expect("install signal handler");

    while let Some((source, result)) = base.next_record() {
        match result {
            Ok(pdu) => {
                log::info!(
                    "peer {} seq {} records {}",
                    source.peer,
                    pdu.header.flow_sequence,
                    pdu.records.len()
                );
            }
            Err(()) => log::warn!("peer {} sent an unparsable datagram", source.peer),
        }
    }
}
