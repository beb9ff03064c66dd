/// Hooks into the presentation layer.
///
/// The coordinator never renders anything itself; it calls a [`TransferUi`].
/// [`EventUi`] turns those calls into [`UiEvent`]s published to every
/// subscriber, [`TracingUi`] just logs them.

use tokio::sync::mpsc;
use tracing::{info, warn};

use pulsear_types::FileListElem;

/// Opacity of the progress overlay at 0%.
pub const OVERLAY_MAX_OPACITY: f64 = 0.85;

/// Opaque handle of a rendered transfer row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RowHandle(pub u64);

pub trait TransferUi: Send {
    /// Render a list row with a progress overlay for a transfer.
    fn create_transfer_row(&mut self, meta: &FileListElem) -> RowHandle;

    /// `fraction` is clamped to `[0, 1]`.
    fn update_progress(&mut self, row: RowHandle, fraction: f64, done: bool);

    fn notify(&mut self, important: bool, text: &str);
}

/// Overlay opacity for a progress fraction: 0.85 at 0%, fading to 0 at 100%.
pub fn overlay_opacity(fraction: f64) -> f64 {
    OVERLAY_MAX_OPACITY * (1.0 - fraction.clamp(0.0, 1.0))
}

#[derive(Debug, Clone, PartialEq)]
pub enum UiEvent {
    RowCreated {
        row: RowHandle,
        meta: FileListElem,
    },
    Progress {
        row: RowHandle,
        fraction: f64,
        opacity: f64,
        done: bool,
    },
    Notify {
        important: bool,
        text: String,
    },
}

/// Publishes every UI call to a list of subscribers.
#[derive(Default)]
pub struct EventUi {
    subscribers: Vec<mpsc::UnboundedSender<UiEvent>>,
    next_row: u64,
}

impl EventUi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<UiEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(tx);
        rx
    }

    fn publish(&mut self, event: UiEvent) {
        // Drop subscribers whose receiver is gone
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }
}

impl TransferUi for EventUi {
    fn create_transfer_row(&mut self, meta: &FileListElem) -> RowHandle {
        let row = RowHandle(self.next_row);
        self.next_row += 1;
        self.publish(UiEvent::RowCreated {
            row,
            meta: meta.clone(),
        });
        row
    }

    fn update_progress(&mut self, row: RowHandle, fraction: f64, done: bool) {
        let fraction = fraction.clamp(0.0, 1.0);
        self.publish(UiEvent::Progress {
            row,
            fraction,
            opacity: overlay_opacity(fraction),
            done,
        });
    }

    fn notify(&mut self, important: bool, text: &str) {
        self.publish(UiEvent::Notify {
            important,
            text: text.to_string(),
        });
    }
}

/// UI that only writes log lines.
#[derive(Default)]
pub struct TracingUi {
    next_row: u64,
}

impl TransferUi for TracingUi {
    fn create_transfer_row(&mut self, meta: &FileListElem) -> RowHandle {
        let row = RowHandle(self.next_row);
        self.next_row += 1;
        info!(row = row.0, "{} ({})", meta.name, meta.size);
        row
    }

    fn update_progress(&mut self, row: RowHandle, fraction: f64, done: bool) {
        info!(row = row.0, done, "progress {:.1}%", fraction.clamp(0.0, 1.0) * 100.0);
    }

    fn notify(&mut self, important: bool, text: &str) {
        if important {
            warn!("{}", text);
        } else {
            info!("{}", text);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlay_opacity() {
        assert!((overlay_opacity(0.0) - 0.85).abs() < 1e-9);
        assert!((overlay_opacity(0.5) - 0.425).abs() < 1e-9);
        assert_eq!(overlay_opacity(1.0), 0.0);
        assert_eq!(overlay_opacity(3.0), 0.0);
    }

    #[test]
    fn test_event_ui_publishes_to_all_subscribers() {
        let mut ui = EventUi::new();
        let mut a = ui.subscribe();
        let mut b = ui.subscribe();

        ui.notify(true, "boom");
        ui.update_progress(RowHandle(0), 1.5, true);

        for rx in [&mut a, &mut b] {
            assert_eq!(
                rx.try_recv().unwrap(),
                UiEvent::Notify {
                    important: true,
                    text: "boom".into()
                }
            );
            assert_eq!(
                rx.try_recv().unwrap(),
                UiEvent::Progress {
                    row: RowHandle(0),
                    fraction: 1.0,
                    opacity: 0.0,
                    done: true
                }
            );
        }
    }

    #[test]
    fn test_closed_subscriber_is_dropped() {
        let mut ui = EventUi::new();
        drop(ui.subscribe());
        ui.notify(false, "hi");
        assert!(ui.subscribers.is_empty());
    }
}
