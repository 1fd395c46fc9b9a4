//! The event dispatcher: monitor -> contacts -> notification plugins.
//!
//! Dispatch never fails an ingest for downstream reasons: an unknown
//! monitor drops the event with a warning, unresolvable contacts and
//! media are skipped, and notification failures are logged. Only a
//! directory outage propagates, so the upstream relay retries.

use futures::future::join_all;
use tracing::{error, info, warn};

use amon_common::{ErrorKind, Event, Result};

use crate::cache::MasterCaches;
use crate::directory::Directory;
use crate::notify::NotifierRegistry;
use crate::store;

pub async fn dispatch_event(
    directory: &dyn Directory,
    caches: &MasterCaches,
    notifiers: &NotifierRegistry,
    event: &Event,
) -> Result<()> {
    let monitor = match store::get_monitor(directory, caches, &event.user, &event.monitor).await {
        Ok(monitor) => monitor,
        Err(err) if err.kind() == ErrorKind::ResourceNotFound => {
            warn!(
                event_uuid = %event.uuid,
                user = %event.user,
                monitor = %event.monitor,
                "Dropping event for unknown monitor."
            );
            return Ok(());
        }
        Err(err) => return Err(err),
    };

    let message = event.render_message();
    let mut deliveries = Vec::new();
    for contact_name in &monitor.contacts {
        let contact =
            match store::get_contact(directory, caches, &monitor.user, contact_name).await {
                Ok(contact) => contact,
                Err(err) => {
                    warn!(
                        monitor = %monitor.name,
                        contact = %contact_name,
                        error = %err,
                        "Skipping unresolvable contact."
                    );
                    continue;
                }
            };
        let notifier = match notifiers.get(&contact.medium) {
            Some(notifier) => notifier.clone(),
            None => {
                warn!(
                    monitor = %monitor.name,
                    contact = %contact.name,
                    medium = %contact.medium,
                    "Skipping contact with unknown notification medium."
                );
                continue;
            }
        };
        let message = message.clone();
        deliveries.push(async move {
            let outcome = notifier.notify(event, &contact.data, &message).await;
            (contact, outcome)
        });
    }

    let count = deliveries.len();
    for (contact, outcome) in join_all(deliveries).await {
        match outcome {
            Ok(()) => info!(
                event_uuid = %event.uuid,
                monitor = %monitor.name,
                contact = %contact.name,
                medium = %contact.medium,
                "Notified contact."
            ),
            Err(err) => error!(
                event_uuid = %event.uuid,
                monitor = %monitor.name,
                contact = %contact.name,
                medium = %contact.medium,
                error = %err,
                "Notification failed."
            ),
        }
    }
    info!(
        event_uuid = %event.uuid,
        monitor = %monitor.name,
        contacts = count,
        "Dispatched event."
    );
    Ok(())
}
