//! MFRC522 NFC reader driver
//!
//! The MFRC522 is attached over SPI. Register access is a two-byte
//! transfer: `[(addr << 1) & 0x7E | read_bit, value]`.
//!
//! Only what the device needs is implemented: REQA, cascade level 1
//! anticollision and SELECT, MIFARE Classic key-A authentication, and
//! 16-byte block read/write. Tags store the text payload in sector 2
//! (blocks 8, 9, 10, trailer 11).

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use embedded_hal::spi::{Error as _, ErrorKind, SpiDevice};
use tracing::{debug, trace};

use super::{decode_payload, encode_payload, NfcError, TagContents, PAYLOAD_BLOCKS};

/// MFRC522 register addresses
pub mod registers {
    pub const COMMAND: u8 = 0x01;
    pub const COMM_IEN: u8 = 0x02;
    pub const COMM_IRQ: u8 = 0x04;
    pub const ERROR: u8 = 0x06;
    pub const STATUS2: u8 = 0x08;
    pub const FIFO_DATA: u8 = 0x09;
    pub const FIFO_LEVEL: u8 = 0x0A;
    pub const CONTROL: u8 = 0x0C;
    pub const BIT_FRAMING: u8 = 0x0D;
    pub const MODE: u8 = 0x11;
    pub const TX_CONTROL: u8 = 0x14;
    pub const TX_ASK: u8 = 0x15;
    pub const T_MODE: u8 = 0x2A;
    pub const T_PRESCALER: u8 = 0x2B;
    pub const T_RELOAD_H: u8 = 0x2C;
    pub const T_RELOAD_L: u8 = 0x2D;
    pub const VERSION: u8 = 0x37;
}

/// MFRC522 command codes
pub mod commands {
    pub const IDLE: u8 = 0x00;
    pub const TRANSCEIVE: u8 = 0x0C;
    pub const MF_AUTHENT: u8 = 0x0E;
    pub const SOFT_RESET: u8 = 0x0F;
}

/// PICC (tag) commands
pub mod picc {
    pub const REQ_IDLE: u8 = 0x26;
    pub const ANTICOLL_CL1: u8 = 0x93;
    pub const AUTH_KEY_A: u8 = 0x60;
    pub const READ: u8 = 0x30;
    pub const WRITE: u8 = 0xA0;
}

/// Factory default MIFARE Classic key
pub const DEFAULT_KEY: [u8; 6] = [0xFF; 6];

/// Sector trailer guarding the payload blocks
pub const TRAILER_BLOCK: u8 = 11;

/// Delay between tag-presence attempts
const TAG_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Iterations to wait for the chip's IRQ bits
const IRQ_WAIT_LIMIT: u32 = 2000;

const FIFO_MAX: u8 = 16;

/// Errors from a single reader operation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Mfrc522Error {
    #[error("SPI transfer failed: {0:?}")]
    Spi(ErrorKind),

    #[error("no tag in the field")]
    NoTag,

    #[error("timed out waiting for the tag")]
    Timeout,

    #[error("communication error (error register {0:#04x})")]
    Communication(u8),

    #[error("UID check byte mismatch")]
    Collision,

    #[error("tag rejected authentication")]
    Auth,

    #[error("unexpected response length {0} bits")]
    BadResponse(usize),

    #[error("tag did not acknowledge (NAK {0:#x})")]
    Nak(u8),
}

impl Mfrc522Error {
    /// Errors that only mean "no usable tag yet"; the wait loop retries them
    fn is_transient(&self) -> bool {
        !matches!(self, Mfrc522Error::Spi(_))
    }
}

impl From<Mfrc522Error> for NfcError {
    fn from(e: Mfrc522Error) -> Self {
        match e {
            Mfrc522Error::Spi(kind) => NfcError::Bus(format!("{kind:?}")),
            other => NfcError::Protocol(other.to_string()),
        }
    }
}

/// Response from a transceive command
struct Frame {
    data: Vec<u8>,
    bits: usize,
}

/// MFRC522 over an SPI device
pub struct Mfrc522<S> {
    spi: S,
}

impl<S: SpiDevice> Mfrc522<S> {
    /// Reset the chip and switch the antenna on
    pub fn new(spi: S) -> Result<Self, Mfrc522Error> {
        let mut reader = Self { spi };
        reader.init()?;
        Ok(reader)
    }

    fn init(&mut self) -> Result<(), Mfrc522Error> {
        self.write_reg(registers::COMMAND, commands::SOFT_RESET)?;
        thread::sleep(Duration::from_millis(50));

        self.write_reg(registers::T_MODE, 0x8D)?;
        self.write_reg(registers::T_PRESCALER, 0x3E)?;
        self.write_reg(registers::T_RELOAD_L, 30)?;
        self.write_reg(registers::T_RELOAD_H, 0)?;
        self.write_reg(registers::TX_ASK, 0x40)?;
        // CRC preset 0x6363
        self.write_reg(registers::MODE, 0x3D)?;

        let tx = self.read_reg(registers::TX_CONTROL)?;
        if tx & 0x03 != 0x03 {
            self.write_reg(registers::TX_CONTROL, tx | 0x03)?;
        }

        let version = self.read_reg(registers::VERSION)?;
        debug!("MFRC522 initialized (version {version:#04x})");
        Ok(())
    }

    /// Block until a tag is read or `stop` is raised
    pub fn wait_read(&mut self, stop: &AtomicBool) -> Result<TagContents, NfcError> {
        self.wait_for(stop, |reader| reader.try_read())
    }

    /// Block until `text` is written to a tag or `stop` is raised
    pub fn wait_write(&mut self, text: &str, stop: &AtomicBool) -> Result<u64, NfcError> {
        let payload = encode_payload(text);
        self.wait_for(stop, |reader| reader.try_write(&payload))
    }

    fn wait_for<T>(
        &mut self,
        stop: &AtomicBool,
        mut attempt: impl FnMut(&mut Self) -> Result<T, Mfrc522Error>,
    ) -> Result<T, NfcError> {
        loop {
            if stop.load(Ordering::SeqCst) {
                return Err(NfcError::Aborted);
            }
            match attempt(self) {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() => {
                    if e != Mfrc522Error::NoTag {
                        trace!(%e, "tag attempt failed, retrying");
                    }
                }
                Err(e) => return Err(e.into()),
            }
            thread::sleep(TAG_POLL_INTERVAL);
        }
    }

    /// One read attempt against whatever tag is in the field
    fn try_read(&mut self) -> Result<TagContents, Mfrc522Error> {
        let uid = self.open_sector()?;
        let result: Result<Vec<u8>, Mfrc522Error> = (|| {
            let mut payload = Vec::with_capacity(PAYLOAD_BLOCKS.len() * 16);
            for block in PAYLOAD_BLOCKS {
                payload.extend_from_slice(&self.read_block(block)?);
            }
            Ok(payload)
        })();
        self.stop_crypto()?;

        let payload = result?;
        Ok(TagContents {
            id: uid_to_id(&uid),
            text: decode_payload(&payload),
        })
    }

    /// One write attempt; returns the tag id on success
    fn try_write(&mut self, payload: &[u8]) -> Result<u64, Mfrc522Error> {
        let uid = self.open_sector()?;
        let result: Result<(), Mfrc522Error> = (|| {
            for (block, chunk) in PAYLOAD_BLOCKS.into_iter().zip(payload.chunks(16)) {
                self.write_block(block, chunk)?;
            }
            Ok(())
        })();
        self.stop_crypto()?;

        result?;
        Ok(uid_to_id(&uid))
    }

    /// Wake, select and authenticate the payload sector of a tag
    fn open_sector(&mut self) -> Result<[u8; 5], Mfrc522Error> {
        self.request()?;
        let uid = self.anticollision()?;
        self.select(&uid)?;
        self.authenticate(TRAILER_BLOCK, &DEFAULT_KEY, &uid)?;
        Ok(uid)
    }

    fn request(&mut self) -> Result<(), Mfrc522Error> {
        // REQA is a 7-bit short frame
        self.write_reg(registers::BIT_FRAMING, 0x07)?;
        let frame = self.transceive(&[picc::REQ_IDLE])?;
        if frame.bits != 0x10 {
            return Err(Mfrc522Error::BadResponse(frame.bits));
        }
        Ok(())
    }

    fn anticollision(&mut self) -> Result<[u8; 5], Mfrc522Error> {
        self.write_reg(registers::BIT_FRAMING, 0x00)?;
        let frame = self.transceive(&[picc::ANTICOLL_CL1, 0x20])?;
        let uid: [u8; 5] = frame
            .data
            .as_slice()
            .try_into()
            .map_err(|_| Mfrc522Error::BadResponse(frame.bits))?;
        let check = uid[..4].iter().fold(0u8, |acc, b| acc ^ b);
        if check != uid[4] {
            return Err(Mfrc522Error::Collision);
        }
        Ok(uid)
    }

    fn select(&mut self, uid: &[u8; 5]) -> Result<u8, Mfrc522Error> {
        let mut buf = vec![picc::ANTICOLL_CL1, 0x70];
        buf.extend_from_slice(uid);
        append_crc(&mut buf);
        let frame = self.transceive(&buf)?;
        if frame.bits != 0x18 {
            return Err(Mfrc522Error::BadResponse(frame.bits));
        }
        // SAK
        Ok(frame.data[0])
    }

    fn authenticate(&mut self, block: u8, key: &[u8; 6], uid: &[u8; 5]) -> Result<(), Mfrc522Error> {
        let mut buf = vec![picc::AUTH_KEY_A, block];
        buf.extend_from_slice(key);
        buf.extend_from_slice(&uid[..4]);
        self.to_card(commands::MF_AUTHENT, &buf)?;
        if self.read_reg(registers::STATUS2)? & 0x08 == 0 {
            return Err(Mfrc522Error::Auth);
        }
        Ok(())
    }

    fn stop_crypto(&mut self) -> Result<(), Mfrc522Error> {
        self.clear_bits(registers::STATUS2, 0x08)
    }

    fn read_block(&mut self, block: u8) -> Result<[u8; 16], Mfrc522Error> {
        let mut buf = vec![picc::READ, block];
        append_crc(&mut buf);
        let frame = self.transceive(&buf)?;
        // 16 data bytes, CRC_A is stripped by the FIFO length cap
        frame
            .data
            .get(..16)
            .and_then(|d| d.try_into().ok())
            .ok_or(Mfrc522Error::BadResponse(frame.bits))
    }

    fn write_block(&mut self, block: u8, data: &[u8]) -> Result<(), Mfrc522Error> {
        let mut buf = vec![picc::WRITE, block];
        append_crc(&mut buf);
        self.expect_ack(&buf)?;

        let mut buf = data.to_vec();
        buf.resize(16, b' ');
        append_crc(&mut buf);
        self.expect_ack(&buf)
    }

    fn expect_ack(&mut self, buf: &[u8]) -> Result<(), Mfrc522Error> {
        let frame = self.transceive(buf)?;
        match frame.data.first() {
            Some(ack) if frame.bits == 4 && ack & 0x0F == 0x0A => Ok(()),
            Some(nak) => Err(Mfrc522Error::Nak(nak & 0x0F)),
            None => Err(Mfrc522Error::BadResponse(frame.bits)),
        }
    }

    fn transceive(&mut self, data: &[u8]) -> Result<Frame, Mfrc522Error> {
        self.to_card(commands::TRANSCEIVE, data)
    }

    /// Run `command` with `data` in the FIFO and collect the response
    fn to_card(&mut self, command: u8, data: &[u8]) -> Result<Frame, Mfrc522Error> {
        let (irq_en, wait_irq) = match command {
            commands::MF_AUTHENT => (0x12, 0x10),
            commands::TRANSCEIVE => (0x77, 0x30),
            _ => (0x00, 0x00),
        };

        self.write_reg(registers::COMM_IEN, irq_en | 0x80)?;
        self.clear_bits(registers::COMM_IRQ, 0x80)?;
        self.set_bits(registers::FIFO_LEVEL, 0x80)?;
        self.write_reg(registers::COMMAND, commands::IDLE)?;

        for &byte in data {
            self.write_reg(registers::FIFO_DATA, byte)?;
        }
        self.write_reg(registers::COMMAND, command)?;
        if command == commands::TRANSCEIVE {
            self.set_bits(registers::BIT_FRAMING, 0x80)?;
        }

        let mut irq = 0;
        let mut remaining = IRQ_WAIT_LIMIT;
        while remaining > 0 {
            irq = self.read_reg(registers::COMM_IRQ)?;
            // timer expired or one of the wait bits set
            if irq & 0x01 != 0 || irq & wait_irq != 0 {
                break;
            }
            remaining -= 1;
        }
        self.clear_bits(registers::BIT_FRAMING, 0x80)?;

        if remaining == 0 {
            return Err(Mfrc522Error::Timeout);
        }

        let error = self.read_reg(registers::ERROR)?;
        if error & 0x1B != 0 {
            return Err(Mfrc522Error::Communication(error));
        }
        if irq & irq_en & 0x01 != 0 {
            return Err(Mfrc522Error::NoTag);
        }

        let mut frame = Frame {
            data: Vec::new(),
            bits: 0,
        };
        if command == commands::TRANSCEIVE {
            let level = self.read_reg(registers::FIFO_LEVEL)?;
            let last_bits = self.read_reg(registers::CONTROL)? & 0x07;
            frame.bits = if last_bits != 0 {
                (usize::from(level).saturating_sub(1)) * 8 + usize::from(last_bits)
            } else {
                usize::from(level) * 8
            };
            let count = level.clamp(1, FIFO_MAX);
            for _ in 0..count {
                frame.data.push(self.read_reg(registers::FIFO_DATA)?);
            }
        }
        Ok(frame)
    }

    fn write_reg(&mut self, addr: u8, value: u8) -> Result<(), Mfrc522Error> {
        self.spi
            .write(&[(addr << 1) & 0x7E, value])
            .map_err(|e| Mfrc522Error::Spi(e.kind()))
    }

    fn read_reg(&mut self, addr: u8) -> Result<u8, Mfrc522Error> {
        let mut buf = [((addr << 1) & 0x7E) | 0x80, 0];
        self.spi
            .transfer_in_place(&mut buf)
            .map_err(|e| Mfrc522Error::Spi(e.kind()))?;
        Ok(buf[1])
    }

    fn set_bits(&mut self, addr: u8, mask: u8) -> Result<(), Mfrc522Error> {
        let value = self.read_reg(addr)?;
        self.write_reg(addr, value | mask)
    }

    fn clear_bits(&mut self, addr: u8, mask: u8) -> Result<(), Mfrc522Error> {
        let value = self.read_reg(addr)?;
        self.write_reg(addr, value & !mask)
    }
}

/// ISO/IEC 14443-A CRC, preset 0x6363, returned low byte first
pub fn crc_a(data: &[u8]) -> [u8; 2] {
    let mut crc: u16 = 0x6363;
    for &byte in data {
        let mut b = byte ^ (crc & 0x00FF) as u8;
        b ^= b << 4;
        let b = u16::from(b);
        crc = (crc >> 8) ^ (b << 8) ^ (b << 3) ^ (b >> 4);
    }
    crc.to_le_bytes()
}

fn append_crc(buf: &mut Vec<u8>) {
    let crc = crc_a(buf);
    buf.extend_from_slice(&crc);
}

/// Fold the 5 anticollision bytes (UID + check byte) into a tag id
pub fn uid_to_id(uid: &[u8; 5]) -> u64 {
    uid.iter().fold(0u64, |id, &b| (id << 8) | u64::from(b))
}
