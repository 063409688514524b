//! Messages exchanged with gateways when looking up historical rounds.

use bytes::{Buf, BufMut};
use cmix_round::{Id, RoundInfo};
use commonware_codec::{EncodeSize, Error, Read, ReadRangeExt, Write};

/// Maximum number of rounds in a single request or response.
pub const MAX_ROUNDS: usize = 16_384;

/// Request for the records of a set of rounds.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Request {
    pub rounds: Vec<Id>,
}

impl Write for Request {
    fn write(&self, writer: &mut impl BufMut) {
        self.rounds.write(writer);
    }
}

impl Read for Request {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &()) -> Result<Self, Error> {
        let rounds = Vec::<Id>::read_range(reader, ..=MAX_ROUNDS)?;
        Ok(Self { rounds })
    }
}

impl EncodeSize for Request {
    fn encode_size(&self) -> usize {
        self.rounds.encode_size()
    }
}

/// Records for the rounds of a [Request], in the same order.
///
/// A `None` entry means the gateway does not (yet) know about the round.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Response {
    pub rounds: Vec<Option<RoundInfo>>,
}

impl Write for Response {
    fn write(&self, writer: &mut impl BufMut) {
        self.rounds.write(writer);
    }
}

impl Read for Response {
    type Cfg = ();

    fn read_cfg(reader: &mut impl Buf, _: &()) -> Result<Self, Error> {
        let rounds = Vec::<Option<RoundInfo>>::read_range(reader, ..=MAX_ROUNDS)?;
        Ok(Self { rounds })
    }
}

impl EncodeSize for Response {
    fn encode_size(&self) -> usize {
        self.rounds.encode_size()
    }
}
