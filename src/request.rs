//! Request frame encoding
//!
//! Builders for every frame the client sends: COTP connection request,
//! COMM_SETUP, READ_VAR, WRITE_VAR and SZL USERDATA. Frames are built
//! outermost-first with placeholder length fields that are patched once the
//! parameter and data sections are complete. Big-endian throughout.

use tracing::debug;

use crate::constants::{
    COTP_CR_LENGTH, COTP_CR_PACKET_LENGTH, COTP_DST_TSAP_PARAM, COTP_DT_EOT, COTP_PDU_TYPE_CR,
    COTP_PDU_TYPE_DT, COTP_SRC_TSAP_PARAM, COTP_TPDU_SIZE_1024, COTP_TPDU_SIZE_PARAM,
    COTP_TSAP_LENGTH, DATA_TS_BIT, DATA_TS_BYTE, DATA_TS_OCTET_STRING, FUNC_COMM_SETUP,
    FUNC_READ_VAR, FUNC_WRITE_VAR, ITEM_SPEC_LENGTH, MAX_AMQ_CALLED, MAX_AMQ_CALLING,
    MAX_ITEMS_PER_PDU, MSG_JOB, MSG_USERDATA, SPEC_TYPE_VAR, SYNTAX_ID_S7ANY, S7_PROTOCOL_ID,
    TPKT_RESERVED, TPKT_VERSION, TS_BIT, TS_BYTE, USERDATA_FUNC_GROUP_CPU, USERDATA_METHOD_REQUEST,
    USERDATA_PARAM_HEAD, USERDATA_PARAM_LENGTH, USERDATA_SUBFUNC_READ_SZL,
};
use crate::error::{S7Error, S7Result};
use crate::pdu::S7Pdu;
use crate::tag::{DataType, Tag};

/// Offset of the TPKT total-length field.
const TPKT_LENGTH_OFFSET: usize = 2;

/// Offset of the S7 parameter-length field.
const PARAM_LENGTH_OFFSET: usize = 13;

/// Offset of the S7 data-length field.
const DATA_LENGTH_OFFSET: usize = 15;

/// Byte offset where the S7 parameter section begins.
const HEADER_SIZE: usize = 17;

/// Build the COTP connection request (CR TPDU).
///
/// Parameter order: requested TPDU size, source TSAP, destination TSAP.
pub fn connection_request(local_tsap: u16, remote_tsap: u16) -> S7Result<S7Pdu> {
    let mut pdu = S7Pdu::new();

    // TPKT header, fixed 22-byte total
    pdu.push(TPKT_VERSION)?;
    pdu.push(TPKT_RESERVED)?;
    pdu.push_u16(COTP_CR_PACKET_LENGTH as u16)?;

    // COTP CR header: dst-ref 0, src-ref 0, class 0
    pdu.push(COTP_CR_LENGTH)?;
    pdu.push(COTP_PDU_TYPE_CR)?;
    pdu.push_u16(0x0000)?;
    pdu.push_u16(0x0000)?;
    pdu.push(0x00)?;

    // Variable part
    pdu.push(COTP_TPDU_SIZE_PARAM)?;
    pdu.push(0x01)?;
    pdu.push(COTP_TPDU_SIZE_1024)?;
    pdu.push(COTP_SRC_TSAP_PARAM)?;
    pdu.push(COTP_TSAP_LENGTH)?;
    pdu.push_u16(local_tsap)?;
    pdu.push(COTP_DST_TSAP_PARAM)?;
    pdu.push(COTP_TSAP_LENGTH)?;
    pdu.push_u16(remote_tsap)?;

    debug!(
        local_tsap = format_args!("0x{local_tsap:04X}"),
        remote_tsap = format_args!("0x{remote_tsap:04X}"),
        "built COTP connection request"
    );
    Ok(pdu)
}

/// Start a TPKT + COTP DT + S7 header frame with placeholder lengths.
fn init_s7_frame(message_type: u8, pdu_reference: u16) -> S7Result<S7Pdu> {
    let mut pdu = S7Pdu::new();

    pdu.push(TPKT_VERSION)?;
    pdu.push(TPKT_RESERVED)?;
    pdu.push_u16(0x0000)?; // TPKT length placeholder

    pdu.push(0x02)?; // COTP length indicator
    pdu.push(COTP_PDU_TYPE_DT)?;
    pdu.push(COTP_DT_EOT)?;

    pdu.push(S7_PROTOCOL_ID)?;
    pdu.push(message_type)?;
    pdu.push_u16(0x0000)?; // reserved
    pdu.push_u16(pdu_reference)?;
    pdu.push_u16(0x0000)?; // parameter length placeholder
    pdu.push_u16(0x0000)?; // data length placeholder

    Ok(pdu)
}

/// Patch the TPKT and S7 length fields from the section boundaries.
fn finalize_frame(pdu: &mut S7Pdu, data_start: usize) -> S7Result<()> {
    let parameter_length = (data_start - HEADER_SIZE) as u16;
    let data_length = (pdu.len() - data_start) as u16;

    pdu.set_u16_at(PARAM_LENGTH_OFFSET, parameter_length)?;
    pdu.set_u16_at(DATA_LENGTH_OFFSET, data_length)?;
    pdu.set_u16_at(TPKT_LENGTH_OFFSET, pdu.len() as u16)?;
    Ok(())
}

/// Build the COMM_SETUP job negotiating the PDU size.
pub fn negotiation_request(pdu_reference: u16, max_pdu: u16) -> S7Result<S7Pdu> {
    let mut pdu = init_s7_frame(MSG_JOB, pdu_reference)?;

    pdu.push(FUNC_COMM_SETUP)?;
    pdu.push(0x00)?;
    pdu.push_u16(MAX_AMQ_CALLING)?;
    pdu.push_u16(MAX_AMQ_CALLED)?;
    pdu.push_u16(max_pdu)?;

    let data_start = pdu.len();
    finalize_frame(&mut pdu, data_start)?;

    debug!(max_pdu, pdu_reference, "built COMM_SETUP request");
    Ok(pdu)
}

/// Transport size code and element count for an item specification.
///
/// BIT items count bits; LREAL/STRING/WSTRING are addressed as byte
/// ranges; every other type counts elements.
pub(crate) fn item_transport(tag: &Tag) -> (u8, u16) {
    match tag.data_type() {
        DataType::Bit => (TS_BIT, tag.length()),
        DataType::LReal | DataType::String | DataType::WString => (TS_BYTE, tag.size() as u16),
        ty => (ty.transport_size(), tag.length()),
    }
}

/// Append one 12-byte item specification.
fn push_item_spec(pdu: &mut S7Pdu, tag: &Tag) -> S7Result<()> {
    let (transport_size, count) = item_transport(tag);

    pdu.push(SPEC_TYPE_VAR)?;
    pdu.push(ITEM_SPEC_LENGTH)?;
    pdu.push(SYNTAX_ID_S7ANY)?;
    pdu.push(transport_size)?;
    pdu.push_u16(count)?;
    pdu.push_u16(tag.db_number())?;
    pdu.push(tag.memory_area().code())?;
    pdu.push_u24(tag.bit_address())?;
    Ok(())
}

fn check_item_count(count: usize) -> S7Result<()> {
    if count == 0 {
        return Err(S7Error::protocol("request needs at least one item"));
    }
    if count > MAX_ITEMS_PER_PDU {
        return Err(S7Error::protocol(format!(
            "too many items in one request: {count} (max {MAX_ITEMS_PER_PDU})"
        )));
    }
    Ok(())
}

/// Build a READ_VAR job for the given tags.
pub fn read_request(pdu_reference: u16, tags: &[Tag]) -> S7Result<S7Pdu> {
    check_item_count(tags.len())?;

    let mut pdu = init_s7_frame(MSG_JOB, pdu_reference)?;
    pdu.push(FUNC_READ_VAR)?;
    pdu.push(tags.len() as u8)?;
    for tag in tags {
        push_item_spec(&mut pdu, tag)?;
    }

    let data_start = pdu.len();
    finalize_frame(&mut pdu, data_start)?;

    debug!(
        items = tags.len(),
        pdu_reference,
        frame_len = pdu.len(),
        "built READ_VAR request"
    );
    Ok(pdu)
}

/// Data-section transport size and length field for one write item.
fn write_data_header(tag: &Tag) -> (u8, u16) {
    match tag.data_type() {
        DataType::Bit => (DATA_TS_BIT, tag.length()),
        DataType::String | DataType::WString => (DATA_TS_OCTET_STRING, tag.size() as u16),
        _ => (DATA_TS_BYTE, (tag.size() * 8) as u16),
    }
}

/// Build a WRITE_VAR job; `payloads[i]` is the encoded value for `tags[i]`.
///
/// Each data section is padded to an even byte boundary except the last.
pub fn write_request(pdu_reference: u16, tags: &[Tag], payloads: &[Vec<u8>]) -> S7Result<S7Pdu> {
    check_item_count(tags.len())?;
    if tags.len() != payloads.len() {
        return Err(S7Error::protocol(format!(
            "write request has {} tags but {} payloads",
            tags.len(),
            payloads.len()
        )));
    }

    let mut pdu = init_s7_frame(MSG_JOB, pdu_reference)?;
    pdu.push(FUNC_WRITE_VAR)?;
    pdu.push(tags.len() as u8)?;
    for tag in tags {
        push_item_spec(&mut pdu, tag)?;
    }

    let data_start = pdu.len();
    for (i, (tag, payload)) in tags.iter().zip(payloads).enumerate() {
        let (transport_size, length) = write_data_header(tag);
        pdu.push(0x00)?; // return code placeholder
        pdu.push(transport_size)?;
        pdu.push_u16(length)?;
        pdu.extend(payload)?;

        if payload.len() % 2 != 0 && i < tags.len() - 1 {
            pdu.push(0x00)?;
        }
    }

    finalize_frame(&mut pdu, data_start)?;

    debug!(
        items = tags.len(),
        pdu_reference,
        frame_len = pdu.len(),
        "built WRITE_VAR request"
    );
    Ok(pdu)
}

/// Build a USERDATA SZL read request.
///
/// `sequence` starts at 1 and is incremented when re-issuing the request to
/// collect further fragments of a multi-fragment response.
pub fn szl_request(pdu_reference: u16, szl_id: u16, szl_index: u16, sequence: u8) -> S7Result<S7Pdu> {
    let mut pdu = init_s7_frame(MSG_USERDATA, pdu_reference)?;

    // Parameter block
    pdu.extend(&USERDATA_PARAM_HEAD)?;
    pdu.push(USERDATA_PARAM_LENGTH)?;
    pdu.push(USERDATA_METHOD_REQUEST)?;
    pdu.push(USERDATA_FUNC_GROUP_CPU)?;
    pdu.push(USERDATA_SUBFUNC_READ_SZL)?;
    pdu.push(sequence)?;

    let data_start = pdu.len();

    // Data block: SZL id and index as an octet string
    pdu.push(0xFF)?;
    pdu.push(DATA_TS_OCTET_STRING)?;
    pdu.push_u16(4)?;
    pdu.push_u16(szl_id)?;
    pdu.push_u16(szl_index)?;

    finalize_frame(&mut pdu, data_start)?;

    debug!(
        szl_id = format_args!("0x{szl_id:04X}"),
        szl_index, sequence, "built SZL request"
    );
    Ok(pdu)
}
