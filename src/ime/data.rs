//! Canonical messages and the per-IME input data that produces them.

use serde::Serialize;

use crate::ime::InputMethod;

/// Everything needed to enter one message with one input method.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct InputData {
    /// VK keys to tap when they differ from `character_key_seq`.
    pub location_key_seq: Vec<String>,
    pub character_key_seq: Vec<String>,
    pub expected_text: String,
    pub voice_file: Option<String>,
    pub handwriting_file: Option<String>,
    /// The text only lands after choosing it from the suggestion bar.
    pub submit_from_suggestion: bool,
}

impl InputData {
    fn typed(keys: &str, expected: &str) -> Self {
        Self {
            character_key_seq: keys.chars().map(String::from).collect(),
            expected_text: expected.to_string(),
            ..Self::default()
        }
    }

    /// Keys to tap on the virtual keyboard.
    pub fn vk_keys(&self) -> &[String] {
        if self.location_key_seq.is_empty() {
            &self.character_key_seq
        } else {
            &self.location_key_seq
        }
    }

    /// The character sequence as one string, for physical typing.
    pub fn typed_text(&self) -> String {
        self.character_key_seq.concat()
    }
}

/// Key of a message table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DataKey {
    Ime(InputMethod),
    /// Language part of a language code ("en" matches "en-US").
    Language(&'static str),
}

/// Canonical texts entered by the input tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Message {
    Hello,
    Password,
    Number,
    Url,
    Email,
    VoiceHello,
    HandwritingHello,
}

impl Message {
    pub const ALL: [Self; 7] = [
        Self::Hello,
        Self::Password,
        Self::Number,
        Self::Url,
        Self::Email,
        Self::VoiceHello,
        Self::HandwritingHello,
    ];

    fn table(self) -> Vec<(DataKey, InputData)> {
        use DataKey::{Ime, Language};
        match self {
            Self::Hello => vec![
                (
                    Ime(InputMethod::JapaneseWithUSKeyboard),
                    InputData::typed("konnnichiha", "こんにちは"),
                ),
                (
                    Ime(InputMethod::Japanese),
                    InputData::typed("konnnichiha", "こんにちは"),
                ),
                (
                    Ime(InputMethod::ChinesePinyin),
                    InputData {
                        submit_from_suggestion: true,
                        ..InputData::typed("nihao", "你好")
                    },
                ),
                (Language("en"), InputData::typed("hello", "hello")),
                (Language("fr"), InputData::typed("bonjour", "bonjour")),
                (Language("es"), InputData::typed("hola", "hola")),
                (Language("sv"), InputData::typed("hej", "hej")),
            ],
            Self::Password => vec![(
                Language("en"),
                InputData::typed("password123", "password123"),
            )],
            Self::Number => vec![
                (Language("en"), InputData::typed("1234567890", "1234567890")),
                (Language("ja"), InputData::typed("1234567890", "1234567890")),
            ],
            Self::Url => vec![(
                Language("en"),
                InputData::typed("example.com", "example.com"),
            )],
            Self::Email => vec![(
                Language("en"),
                InputData {
                    location_key_seq: ["t", "e", "s", "t", "@", "g", "m", "a", "i", "l", ".com"]
                        .into_iter()
                        .map(String::from)
                        .collect(),
                    ..InputData::typed("test@gmail.com", "test@gmail.com")
                },
            )],
            Self::VoiceHello => vec![(
                Language("en"),
                InputData {
                    voice_file: Some("voice_en_hello.wav".to_string()),
                    ..InputData::typed("", "hello")
                },
            )],
            Self::HandwritingHello => vec![(
                Language("en"),
                InputData {
                    handwriting_file: Some("handwriting_en_hello.txt".to_string()),
                    ..InputData::typed("", "hello")
                },
            )],
        }
    }

    /// Data for `im`, preferring an entry for the IME itself over one for
    /// its language.
    pub fn input_data(self, im: InputMethod) -> Option<InputData> {
        let table = self.table();
        let language = im.language_code().split('-').next().unwrap_or_default();
        table
            .iter()
            .find(|(key, _)| *key == DataKey::Ime(im))
            .or_else(|| table.iter().find(|(key, _)| *key == DataKey::Language(language)))
            .map(|(_, data)| data.clone())
    }

    /// Data files (voice clips, stroke files) referenced by any entry.
    pub fn data_files(self) -> Vec<String> {
        self.table()
            .into_iter()
            .flat_map(|(_, d)| d.voice_file.into_iter().chain(d.handwriting_file))
            .collect()
    }
}
