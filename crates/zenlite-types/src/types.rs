//! Device state enumerations reported by the ZenLite transport.

wire_enum! {
    /// BLE connectivity of a device.
    ///
    /// The transport reports these as asynchronous events; the last event
    /// received is the authoritative state of the device.
    pub enum Connectivity {
        /// A connection attempt is in progress.
        Connecting = 0 => "connecting",
        /// The device is connected.
        Connected = 1 => "connected",
        /// A disconnect was requested and has not been confirmed yet.
        Disconnecting = 2 => "disconnecting",
        /// No connection.
        Disconnected = 3 => "disconnected",
    }
}

impl Connectivity {
    /// Whether the device is in a transitional state.
    #[must_use]
    pub fn is_transitional(self) -> bool {
        matches!(self, Connectivity::Connecting | Connectivity::Disconnecting)
    }
}

impl Default for Connectivity {
    fn default() -> Self {
        Connectivity::Disconnected
    }
}

wire_enum! {
    /// Overall electrode contact state.
    pub enum ContactState {
        Unknown = 0 => "unknown",
        /// No electrode touches the skin.
        Off = 1 => "off",
        /// EEG electrodes are on, PPG is not.
        Eeg = 2 => "eeg",
        /// All sensors have contact.
        All = 3 => "all",
    }
}

impl Default for ContactState {
    fn default() -> Self {
        ContactState::Unknown
    }
}

wire_enum! {
    /// EEG electrode contact state.
    pub enum EegContactState {
        Unknown = 0 => "unknown",
        Off = 1 => "off",
        On = 2 => "on",
    }
}

wire_enum! {
    /// PPG sensor contact state, as reported with algorithmic PPG samples.
    pub enum PpgContactState {
        Unknown = 0 => "unknown",
        OffSkin = 1 => "off skin",
        OnSomeObject = 2 => "on some object",
        OnSkin = 3 => "on skin",
    }
}

wire_enum! {
    /// Physical orientation of the headband.
    pub enum Orientation {
        Unknown = 0 => "unknown",
        Upward = 1 => "upward",
        /// Worn upside down.
        Downward = 2 => "downward",
    }
}

wire_enum! {
    /// Discrete device events.
    pub enum DeviceEvent {
        None = 0 => "none",
        FallAsleep = 1 => "fall asleep",
        WakeUp = 2 => "wake up",
        Blink = 3 => "blink",
    }
}

wire_enum! {
    /// Sleep stage classification.
    pub enum SleepStage {
        Unknown = -1 => "unknown",
        Awake = 0 => "awake",
        Rem = 1 => "REM",
        Light = 2 => "light",
        Deep = 3 => "deep",
    }
}

wire_enum! {
    /// Head rotation derived from the IMU.
    pub enum HeadPose {
        Unknown = 0 => "unknown",
        Left = 1 => "left",
        Right = 2 => "right",
        FaceUp = 3 => "face up",
        FaceDown = 4 => "face down",
    }
}

wire_enum! {
    /// Body posture derived from the IMU.
    pub enum BodyPose {
        Unknown = 0 => "unknown",
        /// Lying on the back.
        Back = 1 => "back",
        Seated = 2 => "seated",
        LeanForward = 3 => "lean forward",
        Stomach = 4 => "stomach",
    }
}

impl Default for HeadPose {
    fn default() -> Self {
        HeadPose::Unknown
    }
}

impl Default for BodyPose {
    fn default() -> Self {
        BodyPose::Unknown
    }
}

wire_enum! {
    /// Breathing phase reported alongside the respiratory curve.
    pub enum RespiratoryState {
        Rest = 0 => "rest",
        Inward = 1 => "inward",
        Outward = 2 => "outward",
    }
}

wire_enum! {
    /// Activity class from the PPG algorithm.
    pub enum PpgActivity {
        Rest = 0 => "rest",
        Other = 1 => "other",
        Walk = 2 => "walk",
        Run = 3 => "run",
        Bike = 4 => "bike",
    }
}

wire_enum! {
    /// Progress of an SpO2 measurement.
    pub enum Spo2State {
        AdjustingLed = 0 => "adjusting LED",
        Computing = 1 => "computing",
        Success = 2 => "success",
        Timeout = 3 => "timeout",
    }
}
