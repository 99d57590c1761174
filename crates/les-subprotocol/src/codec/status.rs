//! Status wire form: a list of `[key, value]` pairs.
//!
//! Flag keys (`serveHeaders`, `txRelay`) carry no value and are present only
//! when set. Decoding is order-insensitive and skips keys it does not know.

use rlp::{Decodable, DecoderError, Encodable, Rlp, RlpStream};
use shared_types::{Hash, U256};

use super::list_items;
use crate::domain::{DecodeError, StatusMessage};

pub const PROTOCOL_VERSION: &str = "protocolVersion";
pub const NETWORK_ID: &str = "networkId";
pub const HEAD_TD: &str = "headTd";
pub const HEAD_HASH: &str = "headHash";
pub const HEAD_NUM: &str = "headNum";
pub const GENESIS_HASH: &str = "genesisHash";
pub const SERVE_HEADERS: &str = "serveHeaders";
pub const SERVE_CHAIN_SINCE: &str = "serveChainSince";
pub const SERVE_STATE_SINCE: &str = "serveStateSince";
pub const TX_RELAY: &str = "txRelay";
pub const FLOW_CONTROL_BL: &str = "flowControl/BL";
pub const FLOW_CONTROL_MRC: &str = "flowControl/MRC";
pub const FLOW_CONTROL_MRR: &str = "flowControl/MRR";
pub const ANNOUNCE_TYPE: &str = "announceType";

fn append_pair<E: Encodable>(s: &mut RlpStream, key: &str, value: &E) {
    s.begin_list(2);
    s.append(&key);
    s.append(value);
}

fn append_flag(s: &mut RlpStream, key: &str) {
    s.begin_list(1);
    s.append(&key);
}

impl Encodable for StatusMessage {
    fn rlp_append(&self, s: &mut RlpStream) {
        let optional = [
            self.serve_headers,
            self.serve_chain_since.is_some(),
            self.serve_state_since.is_some(),
            self.tx_relay,
        ];
        let count = 10 + optional.iter().filter(|present| **present).count();

        s.begin_list(count);
        append_pair(s, PROTOCOL_VERSION, &self.protocol_version);
        append_pair(s, NETWORK_ID, &self.network_id);
        append_pair(s, HEAD_TD, &self.head_td);
        append_pair(s, HEAD_HASH, &self.head_hash);
        append_pair(s, HEAD_NUM, &self.head_number);
        append_pair(s, GENESIS_HASH, &self.genesis_hash);
        if self.serve_headers {
            append_flag(s, SERVE_HEADERS);
        }
        if let Some(since) = &self.serve_chain_since {
            append_pair(s, SERVE_CHAIN_SINCE, since);
        }
        if let Some(since) = &self.serve_state_since {
            append_pair(s, SERVE_STATE_SINCE, since);
        }
        if self.tx_relay {
            append_flag(s, TX_RELAY);
        }
        append_pair(s, FLOW_CONTROL_BL, &self.flow_control_buffer_limit);
        append_pair(s, FLOW_CONTROL_MRC, &self.flow_control_maximum_request_cost_table);
        append_pair(s, FLOW_CONTROL_MRR, &self.flow_control_minimum_rate_of_recharge);
        append_pair(s, ANNOUNCE_TYPE, &self.announce_type);
    }
}

/// Fields collected while scanning the pair list.
#[derive(Default)]
struct StatusFields {
    protocol_version: Option<u32>,
    network_id: Option<u64>,
    head_td: Option<U256>,
    head_hash: Option<Hash>,
    head_number: Option<U256>,
    genesis_hash: Option<Hash>,
    serve_headers: bool,
    serve_chain_since: Option<U256>,
    serve_state_since: Option<U256>,
    tx_relay: bool,
    buffer_limit: U256,
    request_cost: U256,
    recharge: U256,
    announce_type: u32,
}

/// Decode a Status, reporting which mandatory key is missing.
pub(crate) fn decode_status(rlp: &Rlp) -> Result<StatusMessage, DecodeError> {
    use DecodeError::MissingStatusField;

    let fields = scan(rlp)?;
    Ok(StatusMessage {
        protocol_version: fields
            .protocol_version
            .ok_or(MissingStatusField(PROTOCOL_VERSION))?,
        network_id: fields.network_id.ok_or(MissingStatusField(NETWORK_ID))?,
        head_td: fields.head_td.ok_or(MissingStatusField(HEAD_TD))?,
        head_hash: fields.head_hash.ok_or(MissingStatusField(HEAD_HASH))?,
        head_number: fields.head_number.ok_or(MissingStatusField(HEAD_NUM))?,
        genesis_hash: fields.genesis_hash.ok_or(MissingStatusField(GENESIS_HASH))?,
        serve_headers: fields.serve_headers,
        serve_chain_since: fields.serve_chain_since,
        serve_state_since: fields.serve_state_since,
        tx_relay: fields.tx_relay,
        flow_control_buffer_limit: fields.buffer_limit,
        flow_control_maximum_request_cost_table: fields.request_cost,
        flow_control_minimum_rate_of_recharge: fields.recharge,
        announce_type: fields.announce_type,
    })
}

fn scan(rlp: &Rlp) -> Result<StatusFields, DecodeError> {
    let mut fields = StatusFields::default();
    for pair in list_items(rlp)? {
        let entry = list_items(&pair)?;
        let (key, value) = match entry.as_slice() {
            [key] => (key, None),
            [key, value] => (key, Some(value)),
            _ => return Err(DecoderError::RlpIncorrectListLen.into()),
        };
        let key: String = key.as_val()?;
        match key.as_str() {
            PROTOCOL_VERSION => fields.protocol_version = Some(required(PROTOCOL_VERSION, value)?),
            NETWORK_ID => fields.network_id = Some(required(NETWORK_ID, value)?),
            HEAD_TD => fields.head_td = Some(required(HEAD_TD, value)?),
            HEAD_HASH => fields.head_hash = Some(required(HEAD_HASH, value)?),
            HEAD_NUM => fields.head_number = Some(required(HEAD_NUM, value)?),
            GENESIS_HASH => fields.genesis_hash = Some(required(GENESIS_HASH, value)?),
            SERVE_HEADERS => fields.serve_headers = true,
            SERVE_CHAIN_SINCE => {
                fields.serve_chain_since = Some(required(SERVE_CHAIN_SINCE, value)?)
            }
            SERVE_STATE_SINCE => {
                fields.serve_state_since = Some(required(SERVE_STATE_SINCE, value)?)
            }
            TX_RELAY => fields.tx_relay = true,
            FLOW_CONTROL_BL => fields.buffer_limit = required(FLOW_CONTROL_BL, value)?,
            FLOW_CONTROL_MRC => fields.request_cost = required(FLOW_CONTROL_MRC, value)?,
            FLOW_CONTROL_MRR => fields.recharge = required(FLOW_CONTROL_MRR, value)?,
            ANNOUNCE_TYPE => fields.announce_type = required(ANNOUNCE_TYPE, value)?,
            _ => {}
        }
    }
    Ok(fields)
}

/// Value of a key that must carry one.
fn required<T: Decodable>(field: &'static str, value: Option<&Rlp>) -> Result<T, DecodeError> {
    match value {
        Some(value) => Ok(value.as_val()?),
        None => Err(DecodeError::InvalidField {
            field,
            reason: "key sent without a value".to_string(),
        }),
    }
}

impl Decodable for StatusMessage {
    fn decode(rlp: &Rlp) -> Result<Self, DecoderError> {
        decode_status(rlp).map_err(|e| match e {
            DecodeError::Rlp(inner) => inner,
            DecodeError::MissingStatusField(_) => {
                DecoderError::Custom("status is missing a mandatory key")
            }
            _ => DecoderError::Custom("status carries an invalid field"),
        })
    }
}
