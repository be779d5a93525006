//! Fakes shared by unit tests

use std::collections::{HashMap, VecDeque};
use std::convert::Infallible;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{ErrorType, InputPin, OutputPin};
use embedded_hal::spi::{self, Operation, SpiDevice};
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::display::{LcdPins, TextDisplay};
use crate::nfc::{encode_payload, NfcError, NfcStore, TagContents, PAYLOAD_BLOCKS};
use crate::state::Mode;
use crate::vision::{ScanError, Scanner};

/// Input pin that is low during scripted millisecond intervals
pub struct ScriptedPin {
    epoch: Instant,
    presses: Vec<(u64, u64)>,
}

impl ScriptedPin {
    /// `presses` are `[start, end)` offsets in ms from now
    pub fn new(presses: &[(u64, u64)]) -> Self {
        Self {
            epoch: Instant::now(),
            presses: presses.to_vec(),
        }
    }

    pub fn epoch(&self) -> Instant {
        self.epoch
    }

    fn pressed(&self) -> bool {
        let now = self.epoch.elapsed().as_millis() as u64;
        self.presses
            .iter()
            .any(|&(start, end)| (start..end).contains(&now))
    }
}

impl ErrorType for ScriptedPin {
    type Error = Infallible;
}

impl InputPin for ScriptedPin {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.pressed())
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        Ok(self.pressed())
    }
}

/// Delay that returns immediately
pub struct NoDelay;

impl DelayNs for NoDelay {
    fn delay_ns(&mut self, _ns: u32) {}
}

const RS: usize = 0;
const E: usize = 1;

#[derive(Default)]
struct BusState {
    levels: [bool; 6],
    latched: Vec<(bool, u8)>,
}

/// Six LCD lines recording what the controller latches on each E fall
#[derive(Clone, Default)]
pub struct RecordingBus {
    state: Arc<Mutex<BusState>>,
}

impl RecordingBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pins(&self) -> LcdPins<BusPin> {
        let pin = |index| BusPin {
            index,
            state: Arc::clone(&self.state),
        };
        LcdPins {
            rs: pin(RS),
            e: pin(E),
            data: [pin(2), pin(3), pin(4), pin(5)],
        }
    }

    /// `(rs, nibble)` for every enable pulse so far
    pub fn latched(&self) -> Vec<(bool, u8)> {
        self.state.lock().unwrap().latched.clone()
    }

    pub fn reset(&self) {
        self.state.lock().unwrap().latched.clear();
    }
}

pub struct BusPin {
    index: usize,
    state: Arc<Mutex<BusState>>,
}

impl ErrorType for BusPin {
    type Error = Infallible;
}

impl OutputPin for BusPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        let mut state = self.state.lock().unwrap();
        if self.index == E && state.levels[E] {
            let nibble = (0..4).fold(0u8, |n, bit| n | (u8::from(state.levels[2 + bit]) << bit));
            let rs = state.levels[RS];
            state.latched.push((rs, nibble));
        }
        state.levels[self.index] = false;
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.state.lock().unwrap().levels[self.index] = true;
        Ok(())
    }
}

/// Display that records every pair of lines written
#[derive(Clone, Default)]
pub struct RecordingDisplay {
    frames: Arc<Mutex<Vec<(String, String)>>>,
}

impl RecordingDisplay {
    pub fn frames(&self) -> Vec<(String, String)> {
        self.frames.lock().unwrap().clone()
    }

    pub fn last(&self) -> Option<(String, String)> {
        self.frames.lock().unwrap().last().cloned()
    }
}

impl TextDisplay for RecordingDisplay {
    fn clear(&self) {}

    fn write_lines(&self, line1: &str, line2: &str) {
        self.frames
            .lock()
            .unwrap()
            .push((line1.to_string(), line2.to_string()));
    }
}

/// Scanner returning queued replies; the last reply repeats
#[derive(Clone, Default)]
pub struct FakeScanner {
    replies: Arc<Mutex<VecDeque<Result<String, String>>>>,
    modes: Arc<Mutex<Vec<Mode>>>,
    calls: Arc<AtomicUsize>,
    gate: Option<Arc<Notify>>,
}

impl FakeScanner {
    pub fn replying(reply: Result<&str, &str>) -> Self {
        let scanner = Self::default();
        scanner
            .replies
            .lock()
            .unwrap()
            .push_back(reply.map(str::to_string).map_err(str::to_string));
        scanner
    }

    /// Like `replying`, but each scan waits for [`FakeScanner::release`]
    pub fn gated(reply: Result<&str, &str>) -> Self {
        Self {
            gate: Some(Arc::new(Notify::new())),
            ..Self::replying(reply)
        }
    }

    pub fn release(&self) {
        if let Some(gate) = &self.gate {
            gate.notify_one();
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn modes(&self) -> Vec<Mode> {
        self.modes.lock().unwrap().clone()
    }
}

impl Scanner for FakeScanner {
    async fn scan(&self, mode: Mode) -> Result<String, ScanError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.modes.lock().unwrap().push(mode);
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }

        let reply = {
            let mut replies = self.replies.lock().unwrap();
            if replies.len() > 1 {
                replies.pop_front()
            } else {
                replies.front().cloned()
            }
        };
        match reply {
            Some(Ok(text)) => Ok(text),
            Some(Err(reason)) => Err(ScanError::CameraUnavailable(reason)),
            None => Err(ScanError::EmptyResult),
        }
    }
}

/// Tag store with an optional tag always in the field
#[derive(Clone, Default)]
pub struct FakeNfc {
    tag: Option<TagContents>,
    fail_writes: bool,
    reads: Arc<AtomicUsize>,
    writes: Arc<Mutex<Vec<String>>>,
}

impl FakeNfc {
    pub fn with_tag(id: u64, text: &str) -> Self {
        Self {
            tag: Some(TagContents {
                id,
                text: text.to_string(),
            }),
            ..Self::default()
        }
    }

    pub fn failing_writes() -> Self {
        Self {
            fail_writes: true,
            ..Self::default()
        }
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> Vec<String> {
        self.writes.lock().unwrap().clone()
    }
}

impl NfcStore for FakeNfc {
    async fn read(&self) -> Result<TagContents, NfcError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        self.tag
            .clone()
            .ok_or_else(|| NfcError::Protocol("no tag".to_string()))
    }

    async fn write(&self, text: String) -> Result<(), NfcError> {
        if self.fail_writes {
            return Err(NfcError::Protocol("tag rejected authentication".to_string()));
        }
        self.writes.lock().unwrap().push(text);
        Ok(())
    }
}

// MFRC522 registers and commands as the fake chip sees them
const REG_COMMAND: u8 = 0x01;
const REG_COMM_IRQ: u8 = 0x04;
const REG_ERROR: u8 = 0x06;
const REG_STATUS2: u8 = 0x08;
const REG_FIFO_DATA: u8 = 0x09;
const REG_FIFO_LEVEL: u8 = 0x0A;
const REG_CONTROL: u8 = 0x0C;
const REG_BIT_FRAMING: u8 = 0x0D;
const REG_VERSION: u8 = 0x37;
const CMD_TRANSCEIVE: u8 = 0x0C;
const CMD_MF_AUTHENT: u8 = 0x0E;
const CRYPTO1_ON: u8 = 0x08;
const ACK: u8 = 0x0A;
const NAK: u8 = 0x04;

/// MIFARE Classic 1K tag with the factory key
#[derive(Debug, Clone)]
pub struct FakeTag {
    uid: [u8; 4],
    blocks: HashMap<u8, [u8; 16]>,
    corrupt_bcc: usize,
    nak_writes: bool,
}

impl FakeTag {
    pub fn new(uid: [u8; 4]) -> Self {
        Self {
            uid,
            blocks: HashMap::new(),
            corrupt_bcc: 0,
            nak_writes: false,
        }
    }

    /// Store `text` in the payload blocks as the device writes it
    pub fn with_text(mut self, text: &str) -> Self {
        let payload = encode_payload(text);
        for (block, chunk) in PAYLOAD_BLOCKS.into_iter().zip(payload.chunks(16)) {
            let mut data = [0u8; 16];
            data.copy_from_slice(chunk);
            self.blocks.insert(block, data);
        }
        self
    }

    /// Answer the next `times` anticollision requests with a bad check byte
    pub fn corrupt_bcc(mut self, times: usize) -> Self {
        self.corrupt_bcc = times;
        self
    }

    /// Refuse every block write
    pub fn nak_writes(mut self) -> Self {
        self.nak_writes = true;
        self
    }

    fn bcc(&self) -> u8 {
        self.uid.iter().fold(0, |acc, b| acc ^ b)
    }
}

struct ChipState {
    regs: [u8; 64],
    fifo: VecDeque<u8>,
    tag: Option<FakeTag>,
    pending_write: Option<u8>,
    requests: usize,
    anticollisions: usize,
    bus_fault: bool,
}

impl Default for ChipState {
    fn default() -> Self {
        Self {
            regs: [0; 64],
            fifo: VecDeque::new(),
            tag: None,
            pending_write: None,
            requests: 0,
            anticollisions: 0,
            bus_fault: false,
        }
    }
}

impl ChipState {
    fn write_reg(&mut self, addr: u8, value: u8) {
        match addr {
            REG_FIFO_DATA => self.fifo.push_back(value),
            REG_FIFO_LEVEL if value & 0x80 != 0 => self.fifo.clear(),
            // Set1 clear: the marked bits are cleared
            REG_COMM_IRQ if value & 0x80 == 0 => self.regs[usize::from(addr)] &= !value,
            REG_COMMAND => {
                self.regs[usize::from(addr)] = value;
                if value == CMD_MF_AUTHENT {
                    self.authenticate();
                }
            }
            REG_BIT_FRAMING => {
                self.regs[usize::from(addr)] = value;
                if value & 0x80 != 0 && self.regs[usize::from(REG_COMMAND)] == CMD_TRANSCEIVE {
                    self.transceive();
                }
            }
            _ => self.regs[usize::from(addr)] = value,
        }
    }

    fn read_reg(&mut self, addr: u8) -> u8 {
        match addr {
            REG_FIFO_DATA => self.fifo.pop_front().unwrap_or(0),
            REG_FIFO_LEVEL => self.fifo.len() as u8,
            _ => self.regs[usize::from(addr)],
        }
    }

    fn authenticate(&mut self) {
        let frame: Vec<u8> = self.fifo.drain(..).collect();
        let accepted = match &self.tag {
            Some(tag) => frame.len() == 12 && frame[2..8] == [0xFF; 6] && frame[8..12] == tag.uid,
            None => false,
        };
        if accepted {
            self.regs[usize::from(REG_STATUS2)] |= CRYPTO1_ON;
        }
        self.regs[usize::from(REG_ERROR)] = 0;
        self.regs[usize::from(REG_COMM_IRQ)] = 0x10;
    }

    fn transceive(&mut self) {
        let frame: Vec<u8> = self.fifo.drain(..).collect();
        self.regs[usize::from(REG_ERROR)] = 0;

        match self.respond(&frame) {
            Some((data, last_bits)) => {
                self.fifo.extend(data);
                self.regs[usize::from(REG_CONTROL)] = last_bits;
                self.regs[usize::from(REG_COMM_IRQ)] = 0x30;
            }
            // Timer runs out
            None => self.regs[usize::from(REG_COMM_IRQ)] = 0x01,
        }
    }

    fn respond(&mut self, frame: &[u8]) -> Option<(Vec<u8>, u8)> {
        if matches!(frame, [0x26]) {
            self.requests += 1;
        }
        let authenticated = self.regs[usize::from(REG_STATUS2)] & CRYPTO1_ON != 0;
        let tag = self.tag.as_mut()?;

        if let Some(block) = self.pending_write.take() {
            let mut data = [0u8; 16];
            data.copy_from_slice(frame.get(..16)?);
            tag.blocks.insert(block, data);
            return Some((vec![ACK], 4));
        }

        match frame {
            [0x26] => Some((vec![0x04, 0x00], 0)),
            [0x93, 0x20] => {
                self.anticollisions += 1;
                let mut bcc = tag.bcc();
                if tag.corrupt_bcc > 0 {
                    tag.corrupt_bcc -= 1;
                    bcc ^= 0xFF;
                }
                let mut data = tag.uid.to_vec();
                data.push(bcc);
                Some((data, 0))
            }
            [0x93, 0x70, ..] => Some((vec![0x08, 0xB6, 0xDD], 0)),
            [0x30, block, _, _] if authenticated => {
                let mut data = tag.blocks.get(block).copied().unwrap_or([0; 16]).to_vec();
                data.extend_from_slice(&[0, 0]);
                Some((data, 0))
            }
            [0xA0, block, _, _] if authenticated => {
                if tag.nak_writes {
                    return Some((vec![NAK], 4));
                }
                self.pending_write = Some(*block);
                Some((vec![ACK], 4))
            }
            _ => None,
        }
    }
}

/// SPI bus with an emulated MFRC522 on the other end
#[derive(Clone, Default)]
pub struct FakeReaderBus {
    chip: Arc<Mutex<ChipState>>,
}

impl FakeReaderBus {
    pub fn new(tag: Option<FakeTag>) -> Self {
        let bus = Self::default();
        {
            let mut chip = bus.chip.lock().unwrap();
            chip.regs[usize::from(REG_VERSION)] = 0x92;
            chip.tag = tag;
        }
        bus
    }

    /// Fail every transfer from now on
    pub fn fail(&self) {
        self.chip.lock().unwrap().bus_fault = true;
    }

    /// REQA frames sent so far
    pub fn requests(&self) -> usize {
        self.chip.lock().unwrap().requests
    }

    pub fn anticollisions(&self) -> usize {
        self.chip.lock().unwrap().anticollisions
    }

    pub fn crypto_on(&self) -> bool {
        self.chip.lock().unwrap().regs[usize::from(REG_STATUS2)] & CRYPTO1_ON != 0
    }

    pub fn block(&self, block: u8) -> Option<[u8; 16]> {
        let chip = self.chip.lock().unwrap();
        chip.tag.as_ref()?.blocks.get(&block).copied()
    }
}

impl spi::ErrorType for FakeReaderBus {
    type Error = spi::ErrorKind;
}

impl SpiDevice for FakeReaderBus {
    fn transaction(&mut self, operations: &mut [Operation<'_, u8>]) -> Result<(), Self::Error> {
        let mut chip = self.chip.lock().unwrap();
        if chip.bus_fault {
            return Err(spi::ErrorKind::Other);
        }
        for op in operations {
            match op {
                Operation::Write(bytes) => chip.write_reg((bytes[0] >> 1) & 0x3F, bytes[1]),
                Operation::TransferInPlace(buf) => {
                    let value = chip.read_reg((buf[0] >> 1) & 0x3F);
                    buf[1] = value;
                }
                _ => {}
            }
        }
        Ok(())
    }
}
