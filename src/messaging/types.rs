/// Messages posted from melody input threads to the scheduler thread
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreMessage {
    MelodyOn { channel: u8, key: u8, velocity: u8 },
    MelodyOff { channel: u8, key: u8, velocity: u8 },
    /// Drain the queue, silence everything and exit
    Stop,
}
