//! Device manager for PC/SC operations

use std::fmt;

use pcsc::{Context, Scope};
use rcard_apdu_core::{CardChannel, TerminalInfo, TerminalSource};

use crate::channel::PcscChannel;
use crate::config::PcscConfig;
use crate::error::PcscError;
use crate::reader::PcscReader;

/// Manager for PC/SC device operations
pub struct PcscDeviceManager {
    /// PC/SC context
    context: Context,
    /// Configuration for opened channels
    config: PcscConfig,
}

impl fmt::Debug for PcscDeviceManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PcscDeviceManager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl PcscDeviceManager {
    /// Create a new PC/SC device manager
    pub fn new() -> Result<Self, PcscError> {
        Self::with_config(PcscConfig::default())
    }

    /// Create a manager whose channels use `config`
    pub fn with_config(config: PcscConfig) -> Result<Self, PcscError> {
        let context = Context::establish(Scope::User).map_err(PcscError::from_pcsc)?;
        Ok(Self { context, config })
    }

    /// List all available card readers
    pub fn list_readers(&self) -> Result<Vec<PcscReader>, PcscError> {
        let readers = self
            .context
            .list_readers_owned()
            .map_err(PcscError::from_pcsc)?;
        if readers.is_empty() {
            return Err(PcscError::NoReadersAvailable);
        }

        // For each reader, check if a card is present
        let mut result = Vec::with_capacity(readers.len());

        for reader_name in readers {
            let mut reader_states = vec![pcsc::ReaderState::new(
                reader_name.as_c_str(),
                pcsc::State::UNAWARE,
            )];

            match self.context.get_status_change(None, &mut reader_states) {
                Ok(()) => result.push(PcscReader::from_reader_state(&reader_states[0])),
                // If we can't get status, assume no card
                Err(_) => result.push(PcscReader::new(
                    reader_name.to_string_lossy().into_owned(),
                    false,
                    None,
                )),
            }
        }

        Ok(result)
    }

    /// Open a channel to the card in a specific reader
    pub fn open_reader(&self, reader_name: &str) -> Result<PcscChannel, PcscError> {
        self.open_reader_with_config(reader_name, self.config)
    }

    /// Open a channel to the card in a specific reader with custom configuration
    pub fn open_reader_with_config(
        &self,
        reader_name: &str,
        config: PcscConfig,
    ) -> Result<PcscChannel, PcscError> {
        // Clone the context to provide ownership to the channel
        PcscChannel::connect(self.context.clone(), reader_name, config)
    }
}

impl TerminalSource for PcscDeviceManager {
    fn terminals(&self) -> rcard_apdu_core::Result<Vec<TerminalInfo>> {
        match self.list_readers() {
            Ok(readers) => Ok(readers.into_iter().map(TerminalInfo::from).collect()),
            Err(PcscError::NoReadersAvailable) => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn connect(&self, name: &str) -> rcard_apdu_core::Result<Box<dyn CardChannel>> {
        Ok(Box::new(self.open_reader(name)?))
    }
}
