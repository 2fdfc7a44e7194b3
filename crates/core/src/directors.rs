use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DirectorStyle {
    AngLee,
    #[default]
    WongKarWai,
    EdwardYang,
    StephenChow,
    /// Sentinel: only the user-pasted corpus is used, no preset sample.
    Custom,
}

impl DirectorStyle {
    pub const ALL: [Self; 5] = [
        Self::AngLee,
        Self::WongKarWai,
        Self::EdwardYang,
        Self::StephenChow,
        Self::Custom,
    ];

    pub fn id(&self) -> &'static str {
        match self {
            Self::AngLee => "ANG_LEE",
            Self::WongKarWai => "WONG_KAR_WAI",
            Self::EdwardYang => "EDWARD_YANG",
            Self::StephenChow => "STEPHEN_CHOW",
            Self::Custom => "CUSTOM",
        }
    }

    pub fn is_custom(&self) -> bool {
        matches!(self, Self::Custom)
    }

    pub fn profile(&self) -> &'static DirectorProfile {
        match self {
            Self::AngLee => &DIRECTORS[0],
            Self::WongKarWai => &DIRECTORS[1],
            Self::EdwardYang => &DIRECTORS[2],
            Self::StephenChow => &DIRECTORS[3],
            Self::Custom => &DIRECTORS[4],
        }
    }

    pub fn sample_corpus(&self) -> &'static str {
        self.profile().sample_corpus
    }
}

impl fmt::Display for DirectorStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown director style `{0}`")]
pub struct UnknownDirectorStyle(pub String);

impl FromStr for DirectorStyle {
    type Err = UnknownDirectorStyle;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|style| style.id() == normalized)
            .ok_or_else(|| UnknownDirectorStyle(s.to_string()))
    }
}

#[derive(Debug)]
pub struct DirectorProfile {
    pub style: DirectorStyle,
    pub name: &'static str,
    pub description: &'static str,
    pub keywords: &'static [&'static str],
    pub sample_corpus: &'static str,
}

pub static DIRECTORS: [DirectorProfile; 5] = [
    DirectorProfile {
        style: DirectorStyle::AngLee,
        name: "李安模式 (Ang Lee)",
        description: "饮食男女，人之大欲。强调压抑的情感、家庭伦理与食物隐喻。",
        keywords: &["压抑", "伦理", "做饭", "父亲", "隐忍"],
        sample_corpus: "[Style Sample: Ang Lee - Eat Drink Man Woman / Lust, Caution]
THEME: Repressed emotion, family duty vs personal desire, food as metaphor.
VISUAL: Static mid-shots of dining tables. Close-ups on hands preparing food.
DIALOGUE: Characters speak about daily trivialities (soup, mahjong) to avoid talking about their real pain.
SUBTEXT: \"I cook for you\" means \"I love you but I can't say it\".",
    },
    DirectorProfile {
        style: DirectorStyle::WongKarWai,
        name: "王家卫模式 (Wong Kar-wai)",
        description: "重塑时间与记忆。强调独白、晃动的镜头、过期的凤梨罐头。",
        keywords: &["独白", "时间", "遗憾", "抽帧", "霓虹"],
        sample_corpus: "[Style Sample: Wong Kar-wai - Chungking Express / In the Mood for Love]
THEME: Time, expiration dates, loneliness, missed connections.
VISUAL: Step-printing (slow shutter), neon lights, reflections in wet streets, claustrophobic framing.
DIALOGUE: Heavy use of Voice Over (Monologue). Characters talk to objects (soap, towels). Obsession with specific numbers and dates.",
    },
    DirectorProfile {
        style: DirectorStyle::EdwardYang,
        name: "杨德昌模式 (Edward Yang)",
        description: "都市的冷静解剖。强调全景镜头、中产阶级困境与社会观察。",
        keywords: &["全景", "冷峻", "城市", "隔阂", "玻璃反射"],
        sample_corpus: "[Style Sample: Edward Yang - Yi Yi / A Brighter Summer Day]
THEME: Urban alienation, the complexity of modern life, the loss of innocence.
VISUAL: Long shots through glass/windows (distancing effect). High angles looking down on city streets.
DIALOGUE: Philosophical, detached, intellectual. Characters often lecture or question the meaning of life.",
    },
    DirectorProfile {
        style: DirectorStyle::StephenChow,
        name: "周星驰模式 (Stephen Chow)",
        description: "笑着哭最痛。强调小人物的心酸、无厘头解构与夸张。",
        keywords: &["无厘头", "小人物", "解构", "咸鱼", "逆袭"],
        sample_corpus: "[Style Sample: Stephen Chow - Kung Fu Hustle / Shaolin Soccer]
THEME: The underdog's journey, deconstruction of martial arts tropes, finding dignity in poverty.
VISUAL: Cartoon physics in live action. Extreme close-ups on \"ugly\" details followed by epic wide shots.
DIALOGUE: Nonsense (Mo Lei Tau), rapid-fire insults, mixing high-stakes drama with mundane complaints.",
    },
    DirectorProfile {
        style: DirectorStyle::Custom,
        name: "自定义语料 (Custom Corpus)",
        description: "高级模式：粘贴任意剧本/小说原文，模型将深度模仿其文风。",
        keywords: &["自定义", "深度学习", "模仿", "实验性"],
        sample_corpus: "",
    },
];
