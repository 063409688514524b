use crate::Error;
use cmix_round::NodeId;
use std::future::Future;

/// A sender that tries a fixed list of gateways in order.
///
/// Gateways without a host in the [crate::Comms] are skipped.
#[derive(Clone)]
pub struct Sender<C: crate::Comms> {
    comms: C,
    gateways: Vec<NodeId>,
}

impl<C: crate::Comms> Sender<C> {
    /// Creates a sender that tries `gateways` in order.
    pub fn new(comms: C, gateways: impl IntoIterator<Item = NodeId>) -> Self {
        Self {
            comms,
            gateways: gateways.into_iter().collect(),
        }
    }
}

impl<C: crate::Comms> crate::Sender for Sender<C> {
    type Host = C::Host;

    async fn send_to_any<T, F, Fut>(&mut self, mut request: F) -> Result<T, Error>
    where
        T: Send,
        F: FnMut(Self::Host) -> Fut + Send,
        Fut: Future<Output = Result<T, Error>> + Send,
    {
        let mut last = Error::NoGateway;
        for gateway in &self.gateways {
            let Some(host) = self.comms.get_host(gateway) else {
                continue;
            };
            match request(host).await {
                Ok(result) => return Ok(result),
                Err(err) => last = err,
            }
        }
        Err(last)
    }
}
