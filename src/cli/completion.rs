//! `clusterplug completion <shell>` command.
//!
//! The scripts complete subcommands and flags statically and ask
//! `clusterplug complete clusters` for cluster names, passing along any
//! `--namespace` already on the command line. File names are never offered.

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub(crate) enum Shell {
    Bash,
    Zsh,
    Fish,
}

pub(crate) fn cmd_completion(shell: Shell) {
    print!("{}", script(shell));
}

pub(crate) fn script(shell: Shell) -> &'static str {
    match shell {
        Shell::Bash => BASH,
        Shell::Zsh => ZSH,
        Shell::Fish => FISH,
    }
}

const BASH: &str = r##"# bash completion for clusterplug
# Load with: source <(clusterplug completion bash)

_clusterplug() {
    local cur="${COMP_WORDS[COMP_CWORD]}"
    local prev="${COMP_WORDS[COMP_CWORD-1]}"
    COMPREPLY=()

    if [[ ${COMP_CWORD} -eq 1 ]]; then
        COMPREPLY=( $(compgen -W "status plugins reconcile completion version" -- "$cur") )
        return
    fi

    case "${COMP_WORDS[1]}" in
        status|reconcile)
            case "$prev" in
                -o|--output)
                    COMPREPLY=( $(compgen -W "text json" -- "$cur") )
                    return
                    ;;
                -n|--namespace)
                    return
                    ;;
            esac
            if [[ "$cur" == -* ]]; then
                local flags="--namespace"
                [[ "${COMP_WORDS[1]}" == status ]] && flags="--verbose --output --namespace"
                COMPREPLY=( $(compgen -W "$flags" -- "$cur") )
                return
            fi

            local ns=() args=() i
            for (( i = 2; i < COMP_CWORD; i++ )); do
                case "${COMP_WORDS[i]}" in
                    -n|--namespace) ns=(--namespace "${COMP_WORDS[i+1]}"); (( i++ )) ;;
                    --namespace=*) ns=(--namespace "${COMP_WORDS[i]#--namespace=}") ;;
                    -o|--output) (( i++ )) ;;
                    -*) ;;
                    *) args+=("${COMP_WORDS[i]}") ;;
                esac
            done
            COMPREPLY=( $(clusterplug complete clusters "${ns[@]}" -- "${args[@]}" "$cur" 2>/dev/null) )
            ;;
        completion)
            [[ ${COMP_CWORD} -eq 2 ]] && COMPREPLY=( $(compgen -W "bash zsh fish" -- "$cur") )
            ;;
    esac
}

complete -F _clusterplug clusterplug
"##;

const ZSH: &str = r##"#compdef clusterplug
# Load with: source <(clusterplug completion zsh)

_clusterplug_clusters() {
    local -a ns clusters
    local i
    for (( i = 2; i < CURRENT; i++ )); do
        case ${words[i]} in
            -n|--namespace) ns=(--namespace ${words[i+1]}) ;;
            --namespace=*) ns=(--namespace ${words[i]#--namespace=}) ;;
        esac
    done
    clusters=(${(f)"$(clusterplug complete clusters $ns -- "$PREFIX" 2>/dev/null)"})
    compadd -a clusters
}

_clusterplug() {
    local state
    _arguments -C \
        '1: :((status\:"Get the status of a cluster and its plugins" plugins\:"List installed plugins" reconcile\:"Run one reconcile cycle for a cluster" completion\:"Print a shell completion script" version\:"Show version information"))' \
        '*:: :->args'

    [[ $state == args ]] || return
    case ${words[1]} in
        status)
            _arguments \
                '(-v --verbose)'{-v,--verbose}'[include plugin capabilities]' \
                '(-o --output)'{-o,--output}'[output format]:format:(text json)' \
                '(-n --namespace)'{-n,--namespace}'[namespace of the cluster]:namespace: ' \
                '1:cluster:_clusterplug_clusters'
            ;;
        reconcile)
            _arguments \
                '(-n --namespace)'{-n,--namespace}'[namespace of the cluster]:namespace: ' \
                '1:cluster:_clusterplug_clusters'
            ;;
        completion)
            _arguments '1:shell:(bash zsh fish)'
            ;;
    esac
}

if [[ $zsh_eval_context[-1] == loadautofunc ]]; then
    _clusterplug "$@"
else
    compdef _clusterplug clusterplug
fi
"##;

const FISH: &str = r##"# fish completion for clusterplug
# Load with: clusterplug completion fish | source

function __clusterplug_clusters
    set -l tokens (commandline -opc)
    set -l ns
    set -l args
    set -l i 3
    while test $i -le (count $tokens)
        switch $tokens[$i]
            case -n --namespace
                set i (math $i + 1)
                set ns --namespace $tokens[$i]
            case '--namespace=*'
                set ns --namespace (string replace -- '--namespace=' '' $tokens[$i])
            case -o --output
                set i (math $i + 1)
            case '-*'
            case '*'
                set -a args $tokens[$i]
        end
        set i (math $i + 1)
    end
    clusterplug complete clusters $ns -- $args (commandline -ct) 2>/dev/null
end

complete -c clusterplug -f
complete -c clusterplug -n __fish_use_subcommand -a status -d 'Get the status of a cluster and its plugins'
complete -c clusterplug -n __fish_use_subcommand -a plugins -d 'List installed plugins'
complete -c clusterplug -n __fish_use_subcommand -a reconcile -d 'Run one reconcile cycle for a cluster'
complete -c clusterplug -n __fish_use_subcommand -a completion -d 'Print a shell completion script'
complete -c clusterplug -n __fish_use_subcommand -a version -d 'Show version information'
complete -c clusterplug -n '__fish_seen_subcommand_from status reconcile' -a '(__clusterplug_clusters)'
complete -c clusterplug -n '__fish_seen_subcommand_from status' -s v -l verbose -d 'Include plugin capabilities'
complete -c clusterplug -n '__fish_seen_subcommand_from status' -s o -l output -x -a 'text json'
complete -c clusterplug -n '__fish_seen_subcommand_from status reconcile' -s n -l namespace -x -d 'Namespace of the cluster'
complete -c clusterplug -n '__fish_seen_subcommand_from completion' -a 'bash zsh fish'
"##;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_script_asks_for_cluster_names() {
        for shell in [Shell::Bash, Shell::Zsh, Shell::Fish] {
            let script = script(shell);
            assert!(script.contains("clusterplug complete clusters"), "{:?}", shell);
            assert!(script.contains("--namespace"), "{:?}", shell);
        }
    }

    #[test]
    fn test_scripts_register_for_the_binary() {
        assert!(BASH.contains("complete -F _clusterplug clusterplug"));
        assert!(ZSH.starts_with("#compdef clusterplug"));
        assert!(FISH.contains("complete -c clusterplug -f"));
    }
}
