//! Keyword and pattern tables driving the content heuristics
//!
//! Everything here is plain data. [`lexicon`] compiles it once into regexes
//! and maps the first time any analyzer runs.

use super::language::{Framework, Language};
use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Ordered language detection patterns; the first language whose pattern
/// matches wins, so more specific languages sit above the ones they resemble.
pub const LANGUAGE_PATTERNS: &[(Language, &str)] = &[
    (
        Language::TypeScript,
        r"(?i:\btypescript\b|```(?:ts|tsx|typescript)\b|\b\w+\.tsx?\b|\btsconfig\b)|\binterface \w+\s*\{|:\s*(?:string|number|boolean)\s*[;,)=]|\btype \w+\s*=\s*\{|\bas const\b",
    ),
    (
        Language::JavaScript,
        r"(?i:\bjavascript\b|\bnode\.?js\b|```(?:js|jsx|javascript)\b|\b\w+\.jsx?\b|\bnpm\b)|console\.log\(|\brequire\(['\x22]|\bmodule\.exports\b|\bdocument\.getElementById\b",
    ),
    (
        Language::Kotlin,
        r"(?i:\bkotlin\b|```kotlin\b|\b\w+\.kts?\b)|\bfun \w+\(|\bsuspend fun\b|\bdata class \w+\(",
    ),
    (
        Language::Scala,
        r"(?i:\bscala\b|```scala\b|\b\w+\.scala\b|\bsbt\b)|\bcase class \w+\(|\bobject \w+ extends\b|\bimplicit (?:val|def)\b",
    ),
    (
        Language::Java,
        r"(?i:\bjava\b|```java\b|\b\w+\.java\b|\bmaven\b|\bgradle\b)|public static void main|System\.out\.println|\bpublic class \w+|@Override\b",
    ),
    (
        Language::Rust,
        r"(?i:\brust\b|```rust\b|\b\w+\.rs\b|\bcargo\b|\bcrates\.io\b)|\bfn \w+(?:<[^>]*>)?\(|\blet mut \w+|\bimpl(?:<[^>]*>)? \w+ for \w+|\bpub (?:fn|struct|enum|trait)\b|&mut self\b",
    ),
    (
        Language::Swift,
        r"(?i:\bswift\b|```swift\b|\b\w+\.swift\b|\bxcode\b)|\bguard let\b|\bfunc \w+\([^)]*\)\s*->|\bimport (?:UIKit|Foundation|SwiftUI)\b",
    ),
    (
        Language::Go,
        r"(?i:\bgolang\b|```go\b|\b\w+\.go\b|\bgo (?:module|mod|routine)s?\b|\bgoroutines?\b)|\bpackage main\b|\bfunc (?:\(\w+ \*?\w+\) )?\w+\(|\bfmt\.Print",
    ),
    (
        Language::CSharp,
        r"(?i:\bc#|\bcsharp\b|```(?:cs|csharp)\b|\b\w+\.cs\b|(?:^|\s)\.net\b|\bdotnet\b)|\busing System(?:\.\w+)*;|\bpublic async Task\b|\bnamespace \w+(?:\.\w+)*\s*[;{]",
    ),
    (
        Language::Cpp,
        r"(?i:\bc\+\+|\bcpp\b|```(?:cpp|c\+\+|cc)\b|\b\w+\.(?:cpp|hpp|cc|cxx)\b|\bcmake\b)|#include <(?:iostream|vector|string|memory|map|algorithm)>|\bstd::\w+|\btemplate\s*<",
    ),
    (
        Language::C,
        r"(?i:```c\b|\bansi c\b|\bc language\b|\bin c\b|\b\w+\.[ch]\b)|#include <(?:stdio|stdlib|string|unistd)\.h>|\bprintf\(|\bmalloc\(|\bint main\(",
    ),
    (
        Language::Python,
        r"(?i:\bpython\b|```(?:py|python)\b|\b\w+\.py\b|\bpip install\b|\bpytest\b)|\bdef \w+\([^)]*\)\s*(?:->\s*[\w\[\], ]+)?:|\bimport (?:numpy|pandas|os|sys|json)\b|\bself\.\w+|\belif\b|__init__",
    ),
    (
        Language::Ruby,
        r"(?i:\bruby\b|```(?:rb|ruby)\b|\b\w+\.rb\b|\bgemfile\b)|\battr_accessor\b|\.each do \||\bputs \w+",
    ),
    (
        Language::Php,
        r"(?i:\bphp\b|```php\b|\b\w+\.php\b|\bcomposer\b)|<\?php|\$this->|\bfunction \w+\(\$",
    ),
    (
        Language::Shell,
        r"(?i:\bbash\b|\bshell script\b|```(?:bash|sh|shell|zsh)\b|\b\w+\.sh\b)|(?m:^#!/(?:usr/)?bin/(?:env )?(?:ba|z)?sh)",
    ),
    (
        Language::Sql,
        r"(?i:\bsql\b|```sql\b|\bpostgres(?:ql)?\b|\bmysql\b|\bsqlite\b)|\bSELECT\b[\s\S]+?\bFROM\b|\bCREATE TABLE\b|\bINSERT INTO\b",
    ),
];

/// Per-language tuning for the content optimizer and complexity tiers
pub struct LanguageProfileSpec {
    pub language: Language,
    /// `false` for languages whose requests rarely benefit from reasoning
    pub should_trigger_reasoning: bool,
    /// Features that make a request in this language complex
    pub complexity_keywords: &'static [&'static str],
    pub framework_patterns: &'static [&'static str],
    pub architectural_patterns: &'static [&'static str],
    pub simple_patterns: &'static [&'static str],
}

pub const LANGUAGE_PROFILES: &[LanguageProfileSpec] = &[
    LanguageProfileSpec {
        language: Language::TypeScript,
        should_trigger_reasoning: true,
        complexity_keywords: &[
            "generic constraint",
            "conditional type",
            "mapped type",
            "type inference",
            "decorator",
            "discriminated union",
            "infer ",
        ],
        framework_patterns: &["react", "next.js", "nextjs", "angular", "nestjs", "vue"],
        architectural_patterns: &[
            "monorepo",
            "state management",
            "module federation",
            "micro-frontend",
            "dependency injection",
            "server components",
        ],
        simple_patterns: &["interface", "type alias", "rename", "add a type"],
    },
    LanguageProfileSpec {
        language: Language::JavaScript,
        should_trigger_reasoning: false,
        complexity_keywords: &["event loop", "closure", "prototype chain", "promise chain"],
        framework_patterns: &["react", "express", "vue", "node"],
        architectural_patterns: &["monorepo", "state management", "micro-frontend"],
        simple_patterns: &["console.log", "array method", "string method"],
    },
    LanguageProfileSpec {
        language: Language::Python,
        should_trigger_reasoning: true,
        complexity_keywords: &[
            "metaclass",
            "asyncio",
            "descriptor",
            "gil",
            "multiprocessing",
            "coroutine",
        ],
        framework_patterns: &["django", "fastapi", "flask", "celery", "sqlalchemy"],
        architectural_patterns: &[
            "celery worker",
            "task queue",
            "orm model",
            "async service",
            "data pipeline",
            "middleware",
        ],
        simple_patterns: &["list comprehension", "print", "f-string", "dictionary"],
    },
    LanguageProfileSpec {
        language: Language::Rust,
        should_trigger_reasoning: true,
        complexity_keywords: &[
            "lifetime",
            "borrow checker",
            "unsafe",
            "trait object",
            "pin<",
            "async runtime",
            "send + sync",
            "macro_rules",
        ],
        framework_patterns: &["tokio", "actix", "axum", "serde", "tower"],
        architectural_patterns: &[
            "workspace",
            "actor",
            "async runtime",
            "zero-copy",
            "trait hierarchy",
            "plugin system",
        ],
        simple_patterns: &["println", "vec!", "string formatting"],
    },
    LanguageProfileSpec {
        language: Language::Go,
        should_trigger_reasoning: true,
        complexity_keywords: &["goroutine", "channel", "context cancellation", "sync.mutex", "select statement"],
        framework_patterns: &["gin", "grpc", "echo", "cobra"],
        architectural_patterns: &["worker pool", "fan-out", "grpc service", "clean architecture"],
        simple_patterns: &["fmt.println", "slice", "struct tag"],
    },
    LanguageProfileSpec {
        language: Language::Java,
        should_trigger_reasoning: true,
        complexity_keywords: &["concurrency", "completablefuture", "reflection", "generics", "jvm tuning"],
        framework_patterns: &["spring", "hibernate", "jakarta", "quarkus"],
        architectural_patterns: &["dependency injection", "hexagonal", "repository pattern", "spring cloud"],
        simple_patterns: &["getter", "setter", "system.out.println"],
    },
    LanguageProfileSpec {
        language: Language::Kotlin,
        should_trigger_reasoning: true,
        complexity_keywords: &["coroutine", "flow", "sealed class", "inline function", "reified"],
        framework_patterns: &["ktor", "spring", "jetpack compose", "compose"],
        architectural_patterns: &["clean architecture", "mvvm", "dependency injection", "multiplatform"],
        simple_patterns: &["data class", "extension function", "println"],
    },
    LanguageProfileSpec {
        language: Language::CSharp,
        should_trigger_reasoning: true,
        complexity_keywords: &["linq", "async/await", "reflection", "span<", "generics"],
        framework_patterns: &["asp.net", "entity framework", "blazor", "unity"],
        architectural_patterns: &["clean architecture", "cqrs", "mediatr", "dependency injection"],
        simple_patterns: &["console.writeline", "property", "string interpolation"],
    },
    LanguageProfileSpec {
        language: Language::Cpp,
        should_trigger_reasoning: true,
        complexity_keywords: &[
            "template metaprogramming",
            "sfinae",
            "move semantics",
            "undefined behavior",
            "memory model",
            "constexpr",
        ],
        framework_patterns: &["qt", "boost", "unreal"],
        architectural_patterns: &["plugin architecture", "lock-free", "memory pool", "abi"],
        simple_patterns: &["cout", "vector", "for loop"],
    },
];

/// Framework detection and tuning
pub struct FrameworkSpec {
    pub framework: Framework,
    /// Languages a framework can legitimately belong to
    pub owners: &'static [Language],
    pub detect: &'static str,
    /// Member of the fixed "complex framework" allow-list
    pub complex: bool,
    /// Minimum content length before the framework can raise the effort
    pub min_length: usize,
    pub architectural: &'static [&'static str],
}

const JS_FAMILY: &[Language] = &[Language::TypeScript, Language::JavaScript];

pub const FRAMEWORKS: &[FrameworkSpec] = &[
    FrameworkSpec {
        framework: Framework::React,
        owners: JS_FAMILY,
        detect: r"(?i:\breact\b|\bjsx\b)|\buse(?:State|Effect|Reducer|Context)\b",
        complex: false,
        min_length: 800,
        architectural: &["state management", "redux", "context provider", "custom hook", "server components"],
    },
    FrameworkSpec {
        framework: Framework::NextJs,
        owners: JS_FAMILY,
        detect: r"(?i:\bnext\.?js\b|\bapp router\b)|\bgetServerSideProps\b|\bgetStaticProps\b",
        complex: true,
        min_length: 600,
        architectural: &["server components", "middleware", "edge runtime", "incremental static", "app router"],
    },
    FrameworkSpec {
        framework: Framework::Vue,
        owners: JS_FAMILY,
        detect: r"(?i:\bvue(?:\.js)?\b|\bnuxt\b|\bpinia\b)",
        complex: false,
        min_length: 800,
        architectural: &["pinia", "vuex", "composition api", "plugin"],
    },
    FrameworkSpec {
        framework: Framework::Angular,
        owners: &[Language::TypeScript],
        detect: r"(?i:\bangular\b|\bngrx\b)|@Component\(|@NgModule\(",
        complex: true,
        min_length: 600,
        architectural: &["ngrx", "lazy loading", "dependency injection", "module", "rxjs"],
    },
    FrameworkSpec {
        framework: Framework::Express,
        owners: JS_FAMILY,
        detect: r"(?i:\bexpress\.?js\b)|require\(['\x22]express['\x22]\)|from ['\x22]express['\x22]|\bapp\.(?:get|post|use)\(",
        complex: false,
        min_length: 800,
        architectural: &["middleware chain", "rate limit", "authentication", "session"],
    },
    FrameworkSpec {
        framework: Framework::NestJs,
        owners: &[Language::TypeScript],
        detect: r"(?i:\bnest\.?js\b)|@Injectable\(|@Module\(",
        complex: true,
        min_length: 600,
        architectural: &["microservice", "cqrs", "guard", "interceptor", "module"],
    },
    FrameworkSpec {
        framework: Framework::Django,
        owners: &[Language::Python],
        detect: r"(?i:\bdjango\b)|\bmodels\.Model\b",
        complex: true,
        min_length: 600,
        architectural: &["middleware", "signal", "orm", "celery", "multi-tenant", "rest framework"],
    },
    FrameworkSpec {
        framework: Framework::Flask,
        owners: &[Language::Python],
        detect: r"(?i:\bflask\b)|@app\.route\(",
        complex: false,
        min_length: 800,
        architectural: &["blueprint", "application factory", "extension"],
    },
    FrameworkSpec {
        framework: Framework::FastApi,
        owners: &[Language::Python],
        detect: r"(?i:\bfastapi\b|\bpydantic\b)",
        complex: false,
        min_length: 800,
        architectural: &["dependency injection", "background task", "async", "middleware"],
    },
    FrameworkSpec {
        framework: Framework::Spring,
        owners: &[Language::Java, Language::Kotlin],
        detect: r"(?i:\bspring ?boot\b|\bspring (?:framework|mvc|data|security|cloud)\b)|@SpringBootApplication|@Autowired|@RestController",
        complex: true,
        min_length: 600,
        architectural: &["microservice", "spring cloud", "bean", "aop", "transaction", "security filter"],
    },
    FrameworkSpec {
        framework: Framework::Rails,
        owners: &[Language::Ruby],
        detect: r"(?i:\brails\b|\bactiverecord\b)",
        complex: true,
        min_length: 600,
        architectural: &["concern", "service object", "active job", "engine", "multi-tenant"],
    },
    FrameworkSpec {
        framework: Framework::Laravel,
        owners: &[Language::Php],
        detect: r"(?i:\blaravel\b|\beloquent\b|\bartisan\b)",
        complex: false,
        min_length: 800,
        architectural: &["service provider", "queue", "event", "middleware"],
    },
    FrameworkSpec {
        framework: Framework::Actix,
        owners: &[Language::Rust],
        detect: r"(?i:\bactix(?:-web)?\b)",
        complex: true,
        min_length: 600,
        architectural: &["actor", "middleware", "extractor", "app state"],
    },
    FrameworkSpec {
        framework: Framework::Axum,
        owners: &[Language::Rust],
        detect: r"(?i:\baxum\b)",
        complex: true,
        min_length: 600,
        architectural: &["tower", "middleware", "extractor", "layer", "state"],
    },
    FrameworkSpec {
        framework: Framework::Tokio,
        owners: &[Language::Rust],
        detect: r"(?i:\btokio\b)",
        complex: false,
        min_length: 800,
        architectural: &["runtime", "select!", "channel", "task"],
    },
    FrameworkSpec {
        framework: Framework::Gin,
        owners: &[Language::Go],
        detect: r"(?i:\bgin-gonic\b|\bgin framework\b)|\bgin\.(?:Context|Default|New)\b",
        complex: false,
        min_length: 800,
        architectural: &["middleware", "router group", "grpc"],
    },
    FrameworkSpec {
        framework: Framework::AspNet,
        owners: &[Language::CSharp],
        detect: r"(?i:\basp\.net\b|\bblazor\b|\bentity framework\b)",
        complex: true,
        min_length: 600,
        architectural: &["middleware", "dependency injection", "cqrs", "mediatr"],
    },
    FrameworkSpec {
        framework: Framework::SwiftUi,
        owners: &[Language::Swift],
        detect: r"(?i:\bswiftui\b|\bcombine framework\b)|:\s*View\s*\{",
        complex: false,
        min_length: 800,
        architectural: &["mvvm", "observable", "environment object", "navigation"],
    },
    FrameworkSpec {
        framework: Framework::Ktor,
        owners: &[Language::Kotlin],
        detect: r"(?i:\bktor\b)",
        complex: false,
        min_length: 800,
        architectural: &["plugin", "routing", "coroutine"],
    },
    FrameworkSpec {
        framework: Framework::Qt,
        owners: &[Language::Cpp],
        detect: r"(?i:\bqt\b|\bqml\b)|\bQObject\b|\bQWidget\b",
        complex: false,
        min_length: 800,
        architectural: &["signal", "slot", "model/view", "plugin"],
    },
];

pub const ARCHITECTURE_KEYWORDS: &[&str] = &[
    "architecture",
    "architect",
    "microservice",
    "system design",
    "design a system",
    "distributed system",
    "scalability",
    "scalable",
    "event-driven",
    "event sourcing",
    "domain-driven",
    "cqrs",
    "service mesh",
    "load balanc",
    "high availability",
    "fault toleran",
    "uptime",
    "sharding",
    "multi-region",
    "infrastructure",
];

pub const ALGORITHMIC_KEYWORDS: &[&str] = &[
    "algorithm",
    "time complexity",
    "space complexity",
    "big o",
    "big-o",
    "o(n",
    "o(log",
    "dynamic programming",
    "recursion",
    "recursive",
    "graph traversal",
    "shortest path",
    "binary search",
    "sorting",
    "data structure",
    "heap",
    "trie",
    "race condition",
    "deadlock",
    "concurrency",
    "optimiz",
];

pub const DEBUGGING_KEYWORDS: &[&str] = &[
    "debug",
    "bug",
    "error",
    "exception",
    "stack trace",
    "traceback",
    "crash",
    "not working",
    "doesn't work",
    "broken",
    "segfault",
    "panic",
    "fails",
    "failing",
];

pub const TESTING_KEYWORDS: &[&str] = &[
    "unit test",
    "integration test",
    "test case",
    "test suite",
    "mock",
    "coverage",
    "tdd",
    "jest",
    "pytest",
    "e2e test",
];

pub const DEVOPS_KEYWORDS: &[&str] = &[
    "docker",
    "kubernetes",
    "k8s",
    "ci/cd",
    "pipeline",
    "terraform",
    "helm",
    "deployment",
    "ansible",
    "github actions",
    "nginx",
];

pub const SIMPLE_KEYWORDS: &[&str] = &[
    "simple",
    "quick",
    "typo",
    "rename",
    "format this",
    "one-liner",
    "hello world",
    "syntax for",
];

/// Phrases that mark a request as a trivial completion (anchored at start)
pub const SIMPLE_COMPLETION_PATTERN: &str = r"(?i)^\s*(?:hi|hello|hey|thanks|thank you|ok|okay|yes|no|sure|good (?:morning|afternoon|evening)|complete this|finish this (?:line|sentence)|fix (?:the |this )?typo|what is the syntax)\b";

/// Explanation requests (anchored at start)
pub const EXPLANATION_PATTERN: &str = r"(?i)^\s*(?:what is|what's|what are|explain|define|describe|tell me about|how does .{1,60}? work)\b";

pub const DEVOPS_PATTERN: &str = r"(?i)\b(?:kubernetes|k8s|docker[- ]compose|terraform|helm charts?|ci/cd pipelines?|infrastructure as code|service mesh)\b";

pub const ARCHITECTURE_PATTERN: &str = r"(?i)\b(?:design (?:a|an|the) [\w\s-]{0,40}?(?:system|architecture|platform|service)|microservices?|system design|scalable architecture|event-driven architecture)\b";

pub const MULTI_LANGUAGE_PATTERN: &str = r"(?i)\b(?:full[- ]stack|polyglot|multiple languages|monorepo|(?:frontend|client)\b.{0,80}\b(?:backend|server))\b";

pub const IMPLEMENTATION_PATTERN: &str =
    r"(?i)\b(?:implement|build|create|write|develop|refactor|add)\b";

/// Language profile compiled to regexes
pub struct LanguageProfile {
    pub should_trigger_reasoning: bool,
    pub complexity: Regex,
    pub frameworks: Regex,
    pub architectural: Regex,
    pub simple: Regex,
}

/// Framework entry compiled to regexes
pub struct FrameworkProfile {
    pub framework: Framework,
    pub owners: &'static [Language],
    pub detect: Regex,
    pub complex: bool,
    pub min_length: usize,
    pub architectural: Regex,
}

/// All heuristic tables, compiled
pub struct Lexicon {
    pub languages: Vec<(Language, Regex)>,
    pub profiles: HashMap<Language, LanguageProfile>,
    pub frameworks: Vec<FrameworkProfile>,
    pub architecture: Regex,
    pub algorithmic: Regex,
    pub debugging: Regex,
    pub testing: Regex,
    pub devops: Regex,
    pub simple: Regex,
    pub simple_completion: Regex,
    pub explanation: Regex,
    pub devops_pattern: Regex,
    pub architecture_pattern: Regex,
    pub multi_language: Regex,
    pub implementation: Regex,
}

static LEXICON: OnceLock<Lexicon> = OnceLock::new();

/// Compiled tables, built on first use
pub fn lexicon() -> &'static Lexicon {
    LEXICON.get_or_init(Lexicon::compile)
}

/// Case-insensitive alternation of literal keywords, anchored at a word start
fn keyword_regex(keywords: &[&str]) -> Regex {
    let alternation = keywords
        .iter()
        .map(|k| regex::escape(k))
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&format!(r"(?i)(?:^|\W)(?:{})", alternation))
        .expect("built-in keyword table compiles")
}

fn pattern_regex(pattern: &str) -> Regex {
    Regex::new(pattern).expect("built-in pattern table compiles")
}

impl Lexicon {
    fn compile() -> Self {
        let languages = LANGUAGE_PATTERNS
            .iter()
            .map(|(language, pattern)| (*language, pattern_regex(pattern)))
            .collect();

        let profiles = LANGUAGE_PROFILES
            .iter()
            .map(|entry| {
                (
                    entry.language,
                    LanguageProfile {
                        should_trigger_reasoning: entry.should_trigger_reasoning,
                        complexity: keyword_regex(entry.complexity_keywords),
                        frameworks: keyword_regex(entry.framework_patterns),
                        architectural: keyword_regex(entry.architectural_patterns),
                        simple: keyword_regex(entry.simple_patterns),
                    },
                )
            })
            .collect();

        let frameworks = FRAMEWORKS
            .iter()
            .map(|entry| FrameworkProfile {
                framework: entry.framework,
                owners: entry.owners,
                detect: pattern_regex(entry.detect),
                complex: entry.complex,
                min_length: entry.min_length,
                architectural: keyword_regex(entry.architectural),
            })
            .collect();

        Self {
            languages,
            profiles,
            frameworks,
            architecture: keyword_regex(ARCHITECTURE_KEYWORDS),
            algorithmic: keyword_regex(ALGORITHMIC_KEYWORDS),
            debugging: keyword_regex(DEBUGGING_KEYWORDS),
            testing: keyword_regex(TESTING_KEYWORDS),
            devops: keyword_regex(DEVOPS_KEYWORDS),
            simple: keyword_regex(SIMPLE_KEYWORDS),
            simple_completion: pattern_regex(SIMPLE_COMPLETION_PATTERN),
            explanation: pattern_regex(EXPLANATION_PATTERN),
            devops_pattern: pattern_regex(DEVOPS_PATTERN),
            architecture_pattern: pattern_regex(ARCHITECTURE_PATTERN),
            multi_language: pattern_regex(MULTI_LANGUAGE_PATTERN),
            implementation: pattern_regex(IMPLEMENTATION_PATTERN),
        }
    }

    pub fn profile(&self, language: Language) -> Option<&LanguageProfile> {
        self.profiles.get(&language)
    }
}
