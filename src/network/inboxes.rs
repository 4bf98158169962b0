use super::*;
use crate::daemon::Mailbox;

/// Lets the daemon queue frames on any live connection while one is being serviced.
pub struct Inboxes<'a>(pub(super) &'a mut SlotMap<client::Client>);

impl Mailbox for Inboxes<'_> {
    fn submit(&mut self, session: usize, response: Response) {
        match self.0.get(session) {
            Some(client) => client.submit(&response),
            None => log::debug!("dropping {response:?} for closed connection {session}"),
        }
    }
}
