/// Host callbacks. Invoked from the controller task, so they should return quickly.
pub trait SessionObserver: Send + Sync {
    /// The session went live.
    fn on_start(&self) {}

    /// A session that went live has been torn down.
    fn on_stop(&self) {}

    /// The reassembled response. At most once per session.
    fn on_message(&self, text: String);
}
