use anyhow::Result;
use assert_cmd::Command;

struct HelpCase {
    path: &'static [&'static str],
    expected_snippet: &'static str,
}

const HELP_CASES: &[HelpCase] = &[
    HelpCase {
        path: &[],
        expected_snippet: "Coverbase policy administration CLI",
    },
    HelpCase {
        path: &["organisation"],
        expected_snippet: "Manage organisations",
    },
    HelpCase {
        path: &["organisation", "create"],
        expected_snippet: "Create an organisation within a tenancy",
    },
    HelpCase {
        path: &["organisation", "add-sign-in-method"],
        expected_snippet: "Attach a sign-in method",
    },
    HelpCase {
        path: &["portal"],
        expected_snippet: "Manage portals",
    },
    HelpCase {
        path: &["portal", "set-default"],
        expected_snippet: "Mark a portal as the default of its kind",
    },
    HelpCase {
        path: &["property"],
        expected_snippet: "Manage additional property definitions",
    },
    HelpCase {
        path: &["summary"],
        expected_snippet: "Generate a periodic dashboard summary",
    },
    HelpCase {
        path: &["updater"],
        expected_snippet: "Run and inspect reference dataset updater jobs",
    },
    HelpCase {
        path: &["updater", "resume"],
        expected_snippet: "Resume a previously persisted job",
    },
    HelpCase {
        path: &["config"],
        expected_snippet: "Inspect or update the configuration",
    },
];

#[test]
fn help_output_covers_every_surface() -> Result<()> {
    for case in HELP_CASES {
        let mut command = Command::cargo_bin("coverbase")?;
        for segment in case.path {
            command.arg(segment);
        }
        command.arg("--help");
        let assert = command.assert().success();
        let output = String::from_utf8(assert.get_output().stdout.clone())?;
        assert!(
            output.contains(case.expected_snippet),
            "expected help for {:?} to contain {:?}, got:\n{output}",
            case.path,
            case.expected_snippet
        );
    }
    Ok(())
}
