use crate::audio::{Modality, Voice};

/// The remote session configuration carried by `session.update`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct Session {
    /// The set of modalities the model can respond with. To disable audio, set this to ["text"].
    modalities: Vec<Modality>,

    /// The voice the model uses to respond. Cannot be changed once the model has responded
    /// with audio.
    #[serde(skip_serializing_if = "Option::is_none")]
    voice: Option<Voice>,

    /// Sampling temperature for the model.
    temperature: f32,

    /// The default system instructions prepended to model calls.
    #[serde(skip_serializing_if = "Option::is_none")]
    instructions: Option<String>,
}

impl Session {
    pub fn new() -> SessionConfigurator {
        SessionConfigurator::new()
    }

    pub fn modalities(&self) -> &[Modality] {
        &self.modalities
    }

    pub fn voice(&self) -> Option<&Voice> {
        self.voice.as_ref()
    }

    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    pub fn instructions(&self) -> Option<&str> {
        self.instructions.as_deref()
    }
}

impl Default for Session {
    fn default() -> Self {
        SessionConfigurator::new().build()
    }
}

pub struct SessionConfigurator {
    session: Session,
}

impl Default for SessionConfigurator {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionConfigurator {
    pub fn new() -> Self {
        Self {
            session: Session {
                modalities: vec![Modality::Text, Modality::Audio],
                voice: None,
                temperature: 0.8,
                instructions: None,
            },
        }
    }

    pub fn with_modalities(mut self, modalities: Vec<Modality>) -> Self {
        self.session.modalities = modalities;
        self
    }

    pub fn with_modalities_disable_audio(mut self) -> Self {
        self.session.modalities = vec![Modality::Text];
        self
    }

    pub fn with_modalities_enable_audio(mut self) -> Self {
        self.session.modalities = vec![Modality::Text, Modality::Audio];
        self
    }

    pub fn with_instructions(mut self, instructions: &str) -> Self {
        self.session.instructions = Some(instructions.to_string());
        self
    }

    pub fn with_voice(mut self, voice: Voice) -> Self {
        self.session.voice = Some(voice);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.session.temperature = temperature;
        self
    }

    pub fn build(self) -> Session {
        self.session
    }
}
