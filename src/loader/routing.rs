use crate::{
    chip::{
        router::{DiagnosticCounter, DiagnosticFilter, FilterSource, RoutingTable},
        transceiver::Transceiver,
        Machine,
    },
    error::{LoadError, Result},
};

use super::progress::ProgressBar;

/// Counter slot for default routed multicast that originated on this chip.
pub const LOCAL_DEFAULT_ROUTED_COUNTER: DiagnosticCounter = DiagnosticCounter::User3;
/// Counter slot for default routed multicast that arrived over a link.
pub const NON_LOCAL_DEFAULT_ROUTED_COUNTER: DiagnosticCounter = DiagnosticCounter::User2;

pub struct RoutingTableLoader;

impl RoutingTableLoader {
    /// Clears and reloads the multicast router of every physical chip.
    ///
    /// Counters and filters are reset before any entry goes in. Virtual
    /// chips are skipped. Every route is checked before the first router is
    /// touched. Any transport failure is returned as is.
    pub fn load_tables<T: Transceiver + ?Sized>(
        transceiver: &mut T,
        machine: &Machine,
        tables: &[RoutingTable],
        app_id: u8,
    ) -> Result<bool> {
        for table in tables {
            if let Some(entry) = table.entries.iter().find(|e| e.route_word().is_none()) {
                return Err(LoadError::InvalidRoute {
                    chip: table.chip,
                    key: entry.key,
                });
            }
        }

        let mut progress = ProgressBar::new(tables.len(), "Loading routing data onto the machine");

        for table in tables {
            let chip = table.chip;
            if machine.is_virtual(chip)? {
                tracing::trace!("{chip}: virtual, no router to load");
                progress.update();
                continue;
            }

            transceiver.clear_multicast_routes(chip)?;
            transceiver.clear_router_diagnostic_counters(chip)?;

            transceiver.set_router_diagnostic_filter(
                chip,
                LOCAL_DEFAULT_ROUTED_COUNTER,
                &DiagnosticFilter::default_routed_multicast(FilterSource::Local),
            )?;
            transceiver.set_router_diagnostic_filter(
                chip,
                NON_LOCAL_DEFAULT_ROUTED_COUNTER,
                &DiagnosticFilter::default_routed_multicast(FilterSource::NonLocal),
            )?;

            if !table.entries.is_empty() {
                tracing::debug!("{chip}: loading {} routes", table.entries.len());
                transceiver.load_multicast_routes(chip, &table.entries, app_id)?;
            }
            progress.update();
        }

        progress.end();
        Ok(true)
    }
}
