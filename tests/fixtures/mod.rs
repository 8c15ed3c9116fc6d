//! Build request fixtures and stand-in conversion scripts

/// A build request together with what the fetcher unpacks for it and the
/// EPUB name the runner must produce.
#[derive(Debug, Clone)]
pub struct BuildScenario {
    pub package: &'static str,
    pub requested_version: &'static str,
    pub uri: &'static str,
    pub fetched_dir: &'static str,
    pub expected_filename: &'static str,
    pub description: &'static str,
}

impl BuildScenario {
    pub fn message(&self) -> String {
        serde_json::json!({
            "package": self.package,
            "version": self.requested_version,
            "transport": { "uri": self.uri },
        })
        .to_string()
    }
}

pub const BUILD_SCENARIOS: &[BuildScenario] = &[
    BuildScenario {
        package: "col123",
        requested_version: "latest",
        uri: "http://example/col123",
        fetched_dir: "col123_2.1_complete",
        expected_filename: "col123-2.1.epub",
        description: "latest resolves from the unpacked directory",
    },
    BuildScenario {
        package: "col11406",
        requested_version: "1.7",
        uri: "http://cnx.org",
        fetched_dir: "col11406_1.7_complete",
        expected_filename: "col11406-1.7.epub",
        description: "explicit version",
    },
    BuildScenario {
        package: "col10000",
        requested_version: "1.4",
        uri: "https://cnx.org",
        fetched_dir: "col10000_1.9_complete",
        expected_filename: "col10000-1.4.epub",
        description: "explicit version wins over the directory name",
    },
];

/// Writes a placeholder EPUB to the `-o` path after checking the collection
/// directory exists.
pub const SUCCESS_SCRIPT: &str = r#"collection="$1"
shift
out=""
while [ $# -gt 0 ]; do
    case "$1" in
        -o) out="$2"; shift 2 ;;
        *) shift ;;
    esac
done
[ -d "$collection" ] || { echo "missing collection $collection" >&2; exit 2; }
printf 'epub of %s' "$(basename "$collection")" > "$out"
echo "wrote $out"
"#;

pub const FAILING_STDERR: &str =
    "Traceback (most recent call last):\n  File \"content2epub.py\", line 42\nValueError: bad cnxml\n";

/// Exits 1 after printing exactly [`FAILING_STDERR`] on standard error.
pub const FAILING_SCRIPT: &str = r#"echo "converting"
printf 'Traceback (most recent call last):\n  File "content2epub.py", line 42\nValueError: bad cnxml\n' >&2
exit 1
"#;

/// Latin-1 stderr as a Python 2 tool prints it; not valid UTF-8.
pub const LATIN1_STDERR: &[u8] = b"caf\xe9 failed\n";

/// Exits 1 after printing exactly [`LATIN1_STDERR`] on standard error.
pub const LATIN1_FAILING_SCRIPT: &str = r#"printf 'caf\351 failed\n' >&2
exit 1
"#;

/// Exits 0 without producing anything.
pub const SILENT_SCRIPT: &str = "exit 0\n";

/// Never finishes on its own.
pub const HANGING_SCRIPT: &str = "sleep 30\n";
