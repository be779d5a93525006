//! Raspberry Pi wiring
//!
//! Requests the button and LCD lines from the GPIO character device and
//! opens the reader's SPI device. Lines are released when their handles are
//! dropped.

use linux_embedded_hal::gpio_cdev::{Chip, LineRequestFlags};
use linux_embedded_hal::spidev::{SpiModeFlags, SpidevOptions};
use linux_embedded_hal::{CdevPin, Delay, SpidevDevice};
use tracing::info;

use crate::config::{GpioSettings, NfcSettings, StartupError};
use crate::display::{Hd44780, LcdDisplay, LcdPins};
use crate::nfc::{Mfrc522, TagStore};

const CONSUMER: &str = "tapscan";

/// Everything attached to the Pi
pub struct Board {
    pub trigger: CdevPin,
    pub mode: CdevPin,
    pub display: LcdDisplay<CdevPin, Delay>,
    pub nfc: TagStore<SpidevDevice>,
    /// Held high for as long as the reader is in use
    _nfc_reset: Option<CdevPin>,
}

impl Board {
    pub fn open(gpio: &GpioSettings, nfc: &NfcSettings) -> Result<Self, StartupError> {
        let mut chip = Chip::new(&gpio.chip).map_err(|e| hardware("gpio chip", e))?;
        info!(chip = %gpio.chip.display(), "gpio chip opened");

        let trigger = input(&mut chip, gpio.trigger_button)?;
        let mode = input(&mut chip, gpio.mode_button)?;

        let pins = LcdPins {
            rs: output(&mut chip, gpio.lcd_rs, 0)?,
            e: output(&mut chip, gpio.lcd_e, 0)?,
            data: [
                output(&mut chip, gpio.lcd_data[0], 0)?,
                output(&mut chip, gpio.lcd_data[1], 0)?,
                output(&mut chip, gpio.lcd_data[2], 0)?,
                output(&mut chip, gpio.lcd_data[3], 0)?,
            ],
        };
        let display = LcdDisplay::new(Hd44780::new(pins, Delay)).map_err(|e| hardware("lcd", e))?;
        info!("lcd initialized");

        let nfc_reset = nfc
            .reset_line
            .map(|line| output(&mut chip, line, 1))
            .transpose()?;

        let mut spi = SpidevDevice::open(&nfc.spi_device).map_err(|e| hardware("spi", e))?;
        let options = SpidevOptions::new()
            .bits_per_word(8)
            .max_speed_hz(nfc.spi_speed_hz)
            .mode(SpiModeFlags::SPI_MODE_0)
            .build();
        spi.0
            .configure(&options)
            .map_err(|e| hardware("spi", e))?;
        let reader = Mfrc522::new(spi).map_err(|e| hardware("nfc reader", e))?;
        info!(device = %nfc.spi_device.display(), "nfc reader initialized");

        Ok(Self {
            trigger,
            mode,
            display,
            nfc: TagStore::new(reader),
            _nfc_reset: nfc_reset,
        })
    }
}

fn input(chip: &mut Chip, offset: u32) -> Result<CdevPin, StartupError> {
    let handle = chip
        .get_line(offset)
        .and_then(|line| line.request(LineRequestFlags::INPUT, 0, CONSUMER))
        .map_err(|e| hardware("button line", e))?;
    CdevPin::new(handle).map_err(|e| hardware("button line", e))
}

fn output(chip: &mut Chip, offset: u32, initial: u8) -> Result<CdevPin, StartupError> {
    let handle = chip
        .get_line(offset)
        .and_then(|line| line.request(LineRequestFlags::OUTPUT, initial, CONSUMER))
        .map_err(|e| hardware("output line", e))?;
    CdevPin::new(handle).map_err(|e| hardware("output line", e))
}

fn hardware(device: &'static str, e: impl std::fmt::Debug) -> StartupError {
    StartupError::Hardware {
        device,
        message: format!("{e:?}"),
    }
}
