use std::fmt::Write;
use std::path::Path;

use crate::providers::azure_devops::{ProtectedState, Resource, ResourceType, ScanResult};
use comfy_table::{Cell, Color as TableColor};

use super::styling::{bright, bright_green, bright_red, bright_yellow, cyan, dim};
use super::tables::{
    color_coded_coverage_cell, color_coded_exposure_cell, create_table, protection_cell,
    protection_coverage,
};

/// Prints a human-readable summary of a finished scan to stdout.
///
/// Displays:
/// - Overview: organization, project/pipeline/build/commit counts, overall check coverage
/// - Protected Resources: per type totals, resources with checks, cross-project resources
/// - Top 10 Exposed Resources: cross-project resources authorized for the most pipelines
/// - Committers: identities pushing through build service accounts
///
/// Coverage is green above 80%, yellow from 50%, red below.
pub fn print_summary(result: &ScanResult, document: &Path) {
    println!("{}", render_summary(result, document));
}

fn create_cyan_header(labels: &[&str]) -> Vec<Cell> {
    labels
        .iter()
        .map(|label| Cell::new(*label).fg(TableColor::Cyan))
        .collect()
}

fn add_section_header(output: &mut String, emoji: &str, title: &str) {
    let _ = writeln!(output, "{} {}", bright(emoji), bright(title).underlined());
}

fn is_protected(resource: &Resource) -> bool {
    resource.protected_state == ProtectedState::Protected
}

/// Pools never carry checks, so they are left out of coverage figures.
fn gated_resources(result: &ScanResult) -> impl Iterator<Item = &Resource> {
    result
        .inventory
        .iter()
        .filter(|resource| resource.resource_type().supports_checks())
}

fn exposed_resources(result: &ScanResult) -> Vec<&Resource> {
    let mut exposed: Vec<&Resource> = result
        .inventory
        .iter()
        .filter(|resource| resource.is_cross_project)
        .collect();
    exposed.sort_by(|a, b| {
        b.pipelinepermissions
            .len()
            .cmp(&a.pipelinepermissions.len())
            .then_with(|| a.name.cmp(&b.name))
    });
    exposed
}

#[allow(clippy::format_push_string)]
fn render_summary(result: &ScanResult, document: &Path) -> String {
    let mut output = String::new();

    add_section_header(&mut output, "📊", "Overview");

    let gated = gated_resources(result).count();
    let protected = gated_resources(result).filter(|r| is_protected(r)).count();
    let coverage = protection_coverage(protected, gated);
    let coverage_display = if coverage > 80.0 {
        bright_green(format!("{coverage:.1}%"))
    } else if coverage >= 50.0 {
        bright_yellow(format!("{coverage:.1}%"))
    } else {
        bright_red(format!("{coverage:.1}%"))
    };

    output.push_str(&format!(
        "  {} {}\n  {} {}\n  {} {}\n  {} {}\n  {} {}\n  {} {}\n  {} {}\n  {} {}\n\n",
        dim("Organization:"),
        cyan(&result.organization),
        dim("Projects scanned:"),
        bright_yellow(result.projects.len()),
        dim("Pipelines:"),
        bright_yellow(result.definitions.len()),
        dim("Builds:"),
        bright_yellow(result.builds.len()),
        dim("Commits:"),
        bright_yellow(result.commits.len()),
        dim("Resources with checks:"),
        coverage_display,
        dim("Scan date:"),
        dim(result.scan_start.format("%Y-%m-%d %H:%M UTC")),
        dim("Results:"),
        dim(document.display())
    ));

    if result.inventory.iter().next().is_none() {
        output.push_str(&format!("{}\n", bright_yellow("No protected resources found.")));
        return output;
    }

    add_section_header(&mut output, "🔐", "Protected Resources");

    let mut resources_table = create_table();
    resources_table.set_header(create_cyan_header(&[
        "Type",
        "Total",
        "With Checks",
        "Cross-Project",
        "Authorized Pipelines",
    ]));

    for resource_type in ResourceType::ALL {
        let total = result.inventory.count(resource_type);
        if total == 0 {
            continue;
        }
        let resources: Vec<&Resource> = result.inventory.resources(resource_type).collect();
        let cross_project = resources.iter().filter(|r| r.is_cross_project).count();
        let authorized: usize = resources.iter().map(|r| r.pipelinepermissions.len()).sum();

        let checks_cell = if resource_type.supports_checks() {
            let protected = resources.iter().filter(|r| is_protected(r)).count();
            color_coded_coverage_cell(protected, total)
        } else {
            Cell::new("n/a").fg(TableColor::DarkGrey)
        };

        resources_table.add_row(vec![
            Cell::new(resource_type),
            Cell::new(total),
            checks_cell,
            color_coded_exposure_cell(cross_project),
            Cell::new(authorized),
        ]);
    }

    output.push_str(&format!("{resources_table}\n\n"));

    let exposed = exposed_resources(result);
    if !exposed.is_empty() {
        add_section_header(&mut output, "🌐", "Top 10 Exposed Resources");

        let mut exposed_table = create_table();
        exposed_table.set_header(create_cyan_header(&[
            "#",
            "Type",
            "Name",
            "Projects",
            "Pipelines",
            "Protection",
        ]));

        for (idx, resource) in exposed.iter().take(10).enumerate() {
            let projects = resource.project_references().map_or_else(
                || resource.pipelinepermissions.project_ids().len(),
                <[_]>::len,
            );
            exposed_table.add_row(vec![
                Cell::new(idx + 1),
                Cell::new(resource.resource_type()),
                Cell::new(&resource.name),
                Cell::new(projects),
                Cell::new(resource.pipelinepermissions.len()),
                protection_cell(is_protected(resource)),
            ]);
        }

        if exposed.len() > 10 {
            let mut row = vec![Cell::new(format!("... and {} more", exposed.len() - 10))
                .fg(TableColor::DarkGrey)];
            row.extend(vec![Cell::new(""); 5]);
            exposed_table.add_row(row);
        }

        output.push_str(&format!("{exposed_table}\n\n"));
    }

    let build_service_pushers: Vec<&str> = result
        .committer_stats
        .iter()
        .filter(|(_, stats)| stats.uses_build_service_account)
        .map(|(email, _)| email.as_str())
        .collect();
    if !build_service_pushers.is_empty() {
        add_section_header(&mut output, "🤖", "Committers Pushing As Build Service");
        for email in &build_service_pushers {
            let _ = writeln!(output, "  {} {}", cyan("•"), email);
        }
        output.push('\n');
    }

    add_section_header(&mut output, "💡", "Next Steps");
    output.push_str(&format!(
        "  {} Add approvals or checks to unprotected endpoints and variable groups\n\
         \x20 {} Review cross-project resources - they let one project's pipelines reach another's secrets\n\
         \x20 {} Restrict resources authorized for all pipelines to the pipelines that need them\n",
        cyan("•"),
        cyan("•"),
        cyan("•")
    ));

    output
}
