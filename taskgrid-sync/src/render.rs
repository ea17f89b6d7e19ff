//! Render events emitted towards the UI layer.

use serde::Serialize;
use tokio::sync::mpsc;

/// What happened to a rendered row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RenderKind {
    Insert,
    Update,
    Delete,
    Upsert,
}

impl RenderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RenderKind::Insert => "insert",
            RenderKind::Update => "update",
            RenderKind::Delete => "delete",
            RenderKind::Upsert => "upsert",
        }
    }
}

/// One row the UI should (re)draw.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderEvent<T> {
    pub kind: RenderKind,
    pub row: T,
}

impl<T> RenderEvent<T> {
    pub fn new(kind: RenderKind, row: T) -> Self {
        Self { kind, row }
    }
}

/// Observer of render events. The UI layer is opaque to the sync core; it
/// only ever sees these events.
pub trait RenderSink<T> {
    fn render(&mut self, event: RenderEvent<T>);
}

impl<T, F> RenderSink<T> for F
where
    F: FnMut(RenderEvent<T>),
{
    fn render(&mut self, event: RenderEvent<T>) {
        self(event)
    }
}

impl<T> RenderSink<T> for mpsc::UnboundedSender<RenderEvent<T>> {
    fn render(&mut self, event: RenderEvent<T>) {
        // A dropped receiver means nobody is rendering anymore.
        let _ = self.send(event);
    }
}

impl<T> RenderSink<T> for Vec<RenderEvent<T>> {
    fn render(&mut self, event: RenderEvent<T>) {
        self.push(event);
    }
}
